use crate::auth::Identity;
use crate::error::AppError;
use crate::state::AppState;
use async_compression::tokio::bufread::ZstdDecoder;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::TryStreamExt;
use serde::Deserialize;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::{ReaderStream, StreamReader};
use vault_sync::manifest::{BackupFiles, ChecksumList};
use vault_sync::sync::signature::{BLOCK_SIZE_HEADER, FILE_SIZE_HEADER};
use vault_sync::{BlockHashManifest, Manifest, Patch, ServiceInfo, DEFAULT_BLOCK_SIZE};

/// Largest block size a sender may ask for.
const MAX_BLOCK_SIZE: usize = 1024 * 1024;

/// Longest `<index>,<weak>:<strong>` line plus its newline.
const MAX_HASH_LINE: u64 = 128;

type BodyReader = Pin<Box<dyn AsyncRead + Send>>;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/service", get(service_info))
        .route("/files", get(list_files))
        .route("/file", get(download_file).put(upload_file).delete(delete_file))
        .route("/patch/hash", get(block_hashes))
        .route("/patch/file", post(patch_file))
        .route("/patch/delta", post(delta))
        .route("/finish", post(finish))
}

#[derive(Debug, Deserialize)]
struct FileQuery {
    file: String,
}

#[derive(Debug, Deserialize)]
struct HashQuery {
    file: String,
    block_size: Option<usize>,
}

async fn service_info(
    State(state): State<Arc<AppState>>,
    Identity(identity): Identity,
) -> Result<Json<ServiceInfo>, AppError> {
    let used_storage = state.store.used_bytes(&identity).await?;

    Ok(Json(ServiceInfo {
        max_storage: state.config.max_storage_bytes,
        used_storage,
    }))
}

async fn list_files(
    State(state): State<Arc<AppState>>,
    Identity(identity): Identity,
) -> Result<Json<BackupFiles>, AppError> {
    let manifest = tokio::task::spawn_blocking(move || state.store.manifest(&identity)).await??;

    Ok(Json(BackupFiles {
        backup_files: manifest.to_checksum_list(),
    }))
}

async fn upload_file(
    State(state): State<Arc<AppState>>,
    Identity(identity): Identity,
    Query(query): Query<FileQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<serde_json::Value>, AppError> {
    let reader = body_reader(&headers, body)?;
    let size = state.store.write_from(&identity, &query.file, reader).await?;
    tracing::debug!(identity = %identity, path = %query.file, size, "File upload complete");

    Ok(Json(serde_json::json!({
        "success": true,
        "path": query.file,
        "size": size,
    })))
}

async fn download_file(
    State(state): State<Arc<AppState>>,
    Identity(identity): Identity,
    Query(query): Query<FileQuery>,
) -> Result<Response, AppError> {
    let path = state.store.resolve(&identity, &query.file)?;
    let file = tokio::fs::File::open(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => AppError::NotFound(format!("{} not found", query.file)),
        _ => AppError::Internal(anyhow::anyhow!("Failed to open {}: {}", path.display(), e)),
    })?;

    Ok(Body::from_stream(ReaderStream::new(file)).into_response())
}

async fn delete_file(
    State(state): State<Arc<AppState>>,
    Identity(identity): Identity,
    Query(query): Query<FileQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.delete(&identity, &query.file).await?;
    tracing::debug!(identity = %identity, path = %query.file, "Deleted file");
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn block_hashes(
    State(state): State<Arc<AppState>>,
    Identity(identity): Identity,
    Query(query): Query<HashQuery>,
) -> Result<Response, AppError> {
    let block_size = match query.block_size {
        Some(bs) if (1..=MAX_BLOCK_SIZE).contains(&bs) => bs,
        _ => DEFAULT_BLOCK_SIZE,
    };

    let hashes = state.store.block_hashes(&identity, &query.file, block_size).await?;

    Ok((
        [
            (BLOCK_SIZE_HEADER, hashes.block_size.to_string()),
            (FILE_SIZE_HEADER, hashes.file_size.to_string()),
        ],
        hashes.to_lines(),
    )
        .into_response())
}

async fn patch_file(
    State(state): State<Arc<AppState>>,
    Identity(identity): Identity,
    Query(query): Query<FileQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<serde_json::Value>, AppError> {
    let raw = read_capped(body_reader(&headers, body)?, state.config.max_patch_bytes).await?;
    let patch = Patch::from_json(&raw)?;

    let size = state.store.apply_patch(&identity, &query.file, &patch).await?;

    tracing::debug!(
        identity = %identity,
        path = %query.file,
        size,
        literal_bytes = patch.literal_bytes(),
        "Applied patch"
    );
    Ok(Json(serde_json::json!({ "success": true, "size": size })))
}

/// Restore side of a changed file: the caller posts the block hashes of its
/// copy and gets back the patch that brings it up to date.
async fn delta(
    State(state): State<Arc<AppState>>,
    Identity(identity): Identity,
    Query(query): Query<FileQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<Patch>, AppError> {
    let block_size = header_number(&headers, BLOCK_SIZE_HEADER)?;
    let file_size = header_number(&headers, FILE_SIZE_HEADER)?;
    if block_size == 0 || block_size > MAX_BLOCK_SIZE as u64 {
        return Err(AppError::BadRequest(format!("unsupported block size {}", block_size)));
    }

    // One line per block of the caller's copy
    let blocks = file_size.div_ceil(block_size);
    let cap = blocks.saturating_mul(MAX_HASH_LINE).saturating_add(MAX_HASH_LINE);
    let body = read_capped(body_reader(&headers, body)?, cap).await?;
    let lines = String::from_utf8(body)
        .map_err(|_| AppError::BadRequest("block hash listing is not UTF-8".into()))?;
    let remote = BlockHashManifest::parse_lines(&lines, block_size as usize, file_size)?;

    let patch = state.store.delta_for(&identity, &query.file, remote).await?;
    Ok(Json(patch))
}

async fn finish(
    State(state): State<Arc<AppState>>,
    Identity(identity): Identity,
    Json(body): Json<ChecksumList>,
) -> Result<Json<serde_json::Value>, AppError> {
    let expected = Manifest::from_checksum_list(body.checksum_list)?;
    let count = expected.len();

    let id = identity.clone();
    tokio::task::spawn_blocking(move || state.store.finish(&id, &expected)).await??;

    tracing::info!(identity = %identity, files = count, "Backup finished and validated");
    Ok(Json(serde_json::json!({ "success": true, "files": count })))
}

/// The request body as a byte reader, undoing `content-encoding: zstd` as
/// it streams.
fn body_reader(headers: &HeaderMap, body: Body) -> Result<BodyReader, AppError> {
    let encoding = headers
        .get("content-encoding")
        .and_then(|v| v.to_str().ok());
    let raw = StreamReader::new(body.into_data_stream().map_err(std::io::Error::other));

    match encoding {
        None | Some("identity") => Ok(Box::pin(raw)),
        Some("zstd") => Ok(Box::pin(ZstdDecoder::new(raw))),
        Some(other) => Err(AppError::BadRequest(format!("unsupported content-encoding {}", other))),
    }
}

/// Read a whole body that has to be parsed in memory, refusing more than
/// `cap` decoded bytes.
async fn read_capped(reader: BodyReader, cap: u64) -> Result<Vec<u8>, AppError> {
    let mut data = Vec::new();
    reader
        .take(cap.saturating_add(1))
        .read_to_end(&mut data)
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read request body: {}", e)))?;

    if data.len() as u64 > cap {
        return Err(AppError::PayloadTooLarge(format!("request body exceeds {} bytes", cap)));
    }
    Ok(data)
}

fn header_number(headers: &HeaderMap, name: &str) -> Result<u64, AppError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| AppError::BadRequest(format!("Missing or invalid {} header", name)))
}

#[cfg(test)]
mod tests {
    use crate::config::{AppConfig, DEFAULT_MAX_PATCH_BYTES};
    use crate::routes::create_router;
    use crate::state::AppState;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use axum::Router;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;
    use vault_sync::fs::content_checksum;
    use vault_sync::sync::{apply, block_hash, diff};
    use vault_sync::{Patch, ServiceInfo};

    const TOKEN: &str = "token secret";

    fn app(max_storage_bytes: u64) -> (TempDir, Router) {
        app_with_patch_limit(max_storage_bytes, DEFAULT_MAX_PATCH_BYTES)
    }

    fn app_with_patch_limit(max_storage_bytes: u64, max_patch_bytes: u64) -> (TempDir, Router) {
        let dir = TempDir::new().unwrap();
        let config = AppConfig {
            port: 0,
            storage_dir: dir.path().to_path_buf(),
            log_level: "info".into(),
            max_storage_bytes,
            max_patch_bytes,
            tokens: HashMap::from([("secret".to_string(), "did:alice".to_string())]),
        };
        let state = Arc::new(AppState::new(config));
        (dir, create_router(state))
    }

    fn request(method: Method, uri: &str, body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", TOKEN)
            .body(body.into())
            .unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_requires_known_token() {
        let (_dir, app) = app(1024);

        let req = Request::builder().uri("/backup/files").body(Body::empty()).unwrap();
        assert_eq!(send(&app, req).await.0, StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .uri("/backup/files")
            .header("authorization", "token wrong")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, req).await.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_upload_list_download_delete() {
        let (_dir, app) = app(1024);

        let (status, _) = send(&app, request(Method::PUT, "/backup/file?file=dir/x.txt", "hello")).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, request(Method::GET, "/backup/files", Body::empty())).await;
        assert_eq!(status, StatusCode::OK);
        let listing: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            listing,
            serde_json::json!({"backup_files": [[content_checksum(b"hello"), "dir/x.txt"]]})
        );

        let (status, body) = send(&app, request(Method::GET, "/backup/file?file=dir/x.txt", Body::empty())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"hello");

        let (status, _) = send(&app, request(Method::DELETE, "/backup/file?file=dir/x.txt", Body::empty())).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app, request(Method::GET, "/backup/file?file=dir/x.txt", Body::empty())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_zstd_upload() {
        let (_dir, app) = app(1024);
        let compressed = zstd::encode_all(&b"compressed body"[..], 3).unwrap();

        let mut req = request(Method::PUT, "/backup/file?file=z.txt", compressed);
        req.headers_mut().insert("content-encoding", "zstd".parse().unwrap());
        assert_eq!(send(&app, req).await.0, StatusCode::OK);

        let (_, body) = send(&app, request(Method::GET, "/backup/file?file=z.txt", Body::empty())).await;
        assert_eq!(body, b"compressed body");
    }

    #[tokio::test]
    async fn test_chunked_upload_is_streamed_to_disk() {
        let (dir, app) = app(8 * 1024 * 1024);
        let chunks: Vec<Result<Vec<u8>, std::io::Error>> = (0..64u8).map(|i| Ok(vec![i; 64 * 1024])).collect();
        let body = Body::from_stream(futures_util::stream::iter(chunks));

        let (status, body) = send(&app, request(Method::PUT, "/backup/file?file=big.bin", body)).await;
        assert_eq!(status, StatusCode::OK);
        let reply: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(reply["size"], 64 * 64 * 1024);

        let stored = std::fs::read(dir.path().join("did:alice/big.bin")).unwrap();
        assert_eq!(stored.len(), 64 * 64 * 1024);
        assert_eq!(stored[64 * 1024], 1);
    }

    #[tokio::test]
    async fn test_compressed_upload_over_quota_stops_while_decoding() {
        let (dir, app) = app(1024);
        // Tiny on the wire, 16 MiB once decoded
        let compressed = zstd::encode_all(&vec![0u8; 16 * 1024 * 1024][..], 3).unwrap();
        assert!(compressed.len() < 64 * 1024);

        let mut req = request(Method::PUT, "/backup/file?file=z.bin", compressed);
        req.headers_mut().insert("content-encoding", "zstd".parse().unwrap());
        assert_eq!(send(&app, req).await.0, StatusCode::INSUFFICIENT_STORAGE);

        // Neither the file nor its temp file stays behind
        let root = dir.path().join("did:alice");
        assert_eq!(std::fs::read_dir(&root).unwrap().count(), 0);

        let (_, body) = send(&app, request(Method::GET, "/backup/service", Body::empty())).await;
        let info: ServiceInfo = serde_json::from_slice(&body).unwrap();
        assert_eq!(info.used_storage, 0);
    }

    #[tokio::test]
    async fn test_unknown_content_encoding_rejected() {
        let (_dir, app) = app(1024);
        let mut req = request(Method::PUT, "/backup/file?file=x", "data");
        req.headers_mut().insert("content-encoding", "br".parse().unwrap());
        assert_eq!(send(&app, req).await.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_oversized_patch_body_rejected() {
        let (_dir, app) = app_with_patch_limit(1024 * 1024, 4096);
        send(&app, request(Method::PUT, "/backup/file?file=x.txt", "hello")).await;

        let compressed = zstd::encode_all(&vec![b' '; 1024 * 1024][..], 3).unwrap();
        let mut req = request(Method::POST, "/backup/patch/file?file=x.txt", compressed);
        req.headers_mut().insert("content-encoding", "zstd".parse().unwrap());
        assert_eq!(send(&app, req).await.0, StatusCode::PAYLOAD_TOO_LARGE);

        let (_, body) = send(&app, request(Method::GET, "/backup/file?file=x.txt", Body::empty())).await;
        assert_eq!(body, b"hello");
    }

    #[tokio::test]
    async fn test_delta_body_bounded_by_declared_file_size() {
        let (_dir, app) = app(1024);
        send(&app, request(Method::PUT, "/backup/file?file=x.txt", "helloworld")).await;

        // One block declared, far more than one line sent
        let mut req = request(Method::POST, "/backup/patch/delta?file=x.txt", vec![b'0'; 64 * 1024]);
        req.headers_mut().insert("x-block-size", "5".parse().unwrap());
        req.headers_mut().insert("x-file-size", "5".parse().unwrap());
        assert_eq!(send(&app, req).await.0, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let (_dir, app) = app(1024);
        let (status, _) = send(&app, request(Method::PUT, "/backup/file?file=../evil", "x")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_quota_enforced_on_upload() {
        let (_dir, app) = app(8);

        let (status, _) = send(&app, request(Method::PUT, "/backup/file?file=a", "12345")).await;
        assert_eq!(status, StatusCode::OK);

        // Overwriting the same file only counts the difference
        let (status, _) = send(&app, request(Method::PUT, "/backup/file?file=a", "1234567")).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app, request(Method::PUT, "/backup/file?file=b", "123")).await;
        assert_eq!(status, StatusCode::INSUFFICIENT_STORAGE);

        let (_, body) = send(&app, request(Method::GET, "/backup/service", Body::empty())).await;
        let info: ServiceInfo = serde_json::from_slice(&body).unwrap();
        assert_eq!(info, ServiceInfo { max_storage: 8, used_storage: 7 });
    }

    #[tokio::test]
    async fn test_patch_hash_then_patch_file() {
        let (_dir, app) = app(1024);
        send(&app, request(Method::PUT, "/backup/file?file=x.txt", "hello")).await;

        let resp = app
            .clone()
            .oneshot(request(Method::GET, "/backup/patch/hash?file=x.txt&block_size=5", Body::empty()))
            .await
            .unwrap();
        assert_eq!(resp.headers()["x-block-size"], "5");
        assert_eq!(resp.headers()["x-file-size"], "5");
        let lines = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let hashes =
            vault_sync::BlockHashManifest::parse_lines(std::str::from_utf8(&lines).unwrap(), 5, 5).unwrap();
        assert_eq!(hashes.blocks.len(), 1);

        let patch = diff(b"helloworld", &hashes).unwrap();
        let (status, _) = send(
            &app,
            request(Method::POST, "/backup/patch/file?file=x.txt", patch.to_json().unwrap()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&app, request(Method::GET, "/backup/file?file=x.txt", Body::empty())).await;
        assert_eq!(body, b"helloworld");
    }

    #[tokio::test]
    async fn test_corrupt_patch_rejected_and_file_kept() {
        let (_dir, app) = app(1024);
        send(&app, request(Method::PUT, "/backup/file?file=x.txt", "hello")).await;

        let mut patch = diff(b"helloworld", &block_hash(b"hello", 5).unwrap()).unwrap();
        patch.checksum = content_checksum(b"not it");
        let (status, _) = send(
            &app,
            request(Method::POST, "/backup/patch/file?file=x.txt", patch.to_json().unwrap()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = send(&app, request(Method::GET, "/backup/file?file=x.txt", Body::empty())).await;
        assert_eq!(body, b"hello");
    }

    #[tokio::test]
    async fn test_delta_for_restore() {
        let (_dir, app) = app(1024);
        send(&app, request(Method::PUT, "/backup/file?file=x.txt", "helloworld")).await;

        let local = b"hello";
        let hashes = block_hash(local, 5).unwrap();
        let mut req = request(Method::POST, "/backup/patch/delta?file=x.txt", hashes.to_lines());
        req.headers_mut().insert("x-block-size", "5".parse().unwrap());
        req.headers_mut().insert("x-file-size", "5".parse().unwrap());

        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        let patch = Patch::from_json(&body).unwrap();
        assert_eq!(apply(local, &patch).unwrap(), b"helloworld");
    }

    #[tokio::test]
    async fn test_finish_validates_checksum_list() {
        let (_dir, app) = app(1024);
        send(&app, request(Method::PUT, "/backup/file?file=x.txt", "hello")).await;

        let good = serde_json::json!({"checksum_list": [[content_checksum(b"hello"), "x.txt"]]});
        let mut req = request(Method::POST, "/backup/finish", good.to_string());
        req.headers_mut().insert("content-type", "application/json".parse().unwrap());
        assert_eq!(send(&app, req).await.0, StatusCode::OK);

        let missing = serde_json::json!({"checksum_list": [
            [content_checksum(b"hello"), "x.txt"],
            [content_checksum(b"other"), "y.txt"],
        ]});
        let mut req = request(Method::POST, "/backup/finish", missing.to_string());
        req.headers_mut().insert("content-type", "application/json".parse().unwrap());
        assert_eq!(send(&app, req).await.0, StatusCode::BAD_REQUEST);
    }
}
