//! HTTP client for the `/backup/*` surface of a backup service.

use crate::config::{Compression, SyncConfig};
use crate::transfer::{ProgressStream, TransferCounters};
use crate::utils::errors::{NodeError, Result};
use futures_util::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response};
use std::path::Path;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use vault_sync::fs::AtomicFile;
use vault_sync::manifest::{BackupFiles, ChecksumList};
use vault_sync::sync::signature::{BLOCK_SIZE_HEADER, FILE_SIZE_HEADER};
use vault_sync::{BlockHashManifest, Manifest, Patch, ServiceInfo};

/// Files at least this large are streamed uncompressed.
const MAX_COMPRESS_SIZE: u64 = 500 * 1024 * 1024;

/// One identity's authenticated session with a backup service.
#[derive(Clone)]
pub struct BackupClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    compression: Compression,
    counters: TransferCounters,
}

impl BackupClient {
    /// `request_timeout_secs` bounds each wait for the next read, so a
    /// transfer of any length succeeds as long as bytes keep arriving.
    pub fn new(base_url: &str, token: &str, sync: &SyncConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .read_timeout(Duration::from_secs(sync.request_timeout_secs))
            .connect_timeout(Duration::from_secs(sync.connect_timeout_secs))
            .build()
            .map_err(|e| NodeError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            compression: sync.compression,
            counters: TransferCounters::default(),
        })
    }

    /// Byte counters of every transfer made through this client.
    pub fn counters(&self) -> &TransferCounters {
        &self.counters
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/backup{}", self.base_url, path))
            .header(AUTHORIZATION, format!("token {}", self.token))
    }

    fn file_request(&self, method: Method, path: &str, relative: &str) -> RequestBuilder {
        self.request(method, path).query(&[("file", relative)])
    }

    /// Storage limit and current usage reported by the service.
    pub async fn service_info(&self) -> Result<ServiceInfo> {
        let resp = send(self.request(Method::GET, "/service"), "GET /backup/service").await?;
        Ok(resp.json().await?)
    }

    /// Remote manifest of the identity's store.
    pub async fn list_files(&self) -> Result<Manifest> {
        let resp = send(self.request(Method::GET, "/files"), "GET /backup/files").await?;
        let body: BackupFiles = resp.json().await?;
        Ok(Manifest::from_checksum_list(body.backup_files)?)
    }

    /// Stream a local file to `relative` on the service.
    pub async fn upload_file(&self, relative: &str, path: &Path, size: u64) -> Result<()> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| NodeError::Filesystem(format!("failed to open {}: {}", path.display(), e)))?;

        let req = self.file_request(Method::PUT, "/file", relative);
        let req = if self.compression == Compression::Zstd && size < MAX_COMPRESS_SIZE {
            use async_compression::tokio::bufread::ZstdEncoder;
            use tokio::io::BufReader;

            let compressed = ZstdEncoder::with_quality(BufReader::new(file), async_compression::Level::Default);
            let stream = ProgressStream::new(ReaderStream::new(compressed), self.counters.sent.clone());
            req.header(CONTENT_ENCODING, "zstd")
                .body(reqwest::Body::wrap_stream(stream))
        } else {
            let stream = ProgressStream::new(ReaderStream::new(file), self.counters.sent.clone());
            req.body(reqwest::Body::wrap_stream(stream))
        };

        send(req, "PUT /backup/file").await?;
        tracing::debug!(path = %relative, size, "Uploaded file");
        Ok(())
    }

    /// Download `relative` into `dest` through a temp file and rename.
    pub async fn download_file(&self, relative: &str, dest: &Path) -> Result<u64> {
        let resp = send(self.file_request(Method::GET, "/file", relative), "GET /backup/file").await?;

        let mut out = AtomicFile::create(dest).await?;
        let mut written = 0u64;
        let mut body = ProgressStream::new(Box::pin(resp.bytes_stream()), self.counters.received.clone());
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            out.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        out.commit().await?;

        tracing::debug!(path = %relative, size = written, "Downloaded file");
        Ok(written)
    }

    pub async fn delete_file(&self, relative: &str) -> Result<()> {
        send(self.file_request(Method::DELETE, "/file", relative), "DELETE /backup/file").await?;
        Ok(())
    }

    /// Block hashes of the service's copy of `relative`.
    ///
    /// `block_size` is a request; the service's choice comes back in the
    /// response headers and wins.
    pub async fn block_hashes(&self, relative: &str, block_size: usize) -> Result<BlockHashManifest> {
        let req = self
            .file_request(Method::GET, "/patch/hash", relative)
            .query(&[("block_size", block_size)]);
        let resp = send(req, "GET /backup/patch/hash").await?;

        let block_size = header_number(&resp, BLOCK_SIZE_HEADER)? as usize;
        let file_size = header_number(&resp, FILE_SIZE_HEADER)?;
        let body = resp.text().await?;
        self.counters.add_received(body.len() as u64);

        Ok(BlockHashManifest::parse_lines(&body, block_size, file_size)?)
    }

    /// Have the service rebuild `relative` from its copy and `patch`.
    pub async fn patch_file(&self, relative: &str, patch: &Patch) -> Result<()> {
        let (body, encoded) = self.encode(patch.to_json()?).await?;
        self.counters.add_sent(body.len() as u64);

        let mut req = self
            .file_request(Method::POST, "/patch/file", relative)
            .header(CONTENT_TYPE, "application/json");
        if encoded {
            req = req.header(CONTENT_ENCODING, "zstd");
        }
        send(req.body(body), "POST /backup/patch/file").await?;
        Ok(())
    }

    /// Patch from our copy of `relative` (described by `local`) to the
    /// service's copy.
    pub async fn delta(&self, relative: &str, local: &BlockHashManifest) -> Result<Patch> {
        let lines = local.to_lines();
        self.counters.add_sent(lines.len() as u64);

        let req = self
            .file_request(Method::POST, "/patch/delta", relative)
            .header(BLOCK_SIZE_HEADER, local.block_size.to_string())
            .header(FILE_SIZE_HEADER, local.file_size.to_string())
            .body(lines);
        let resp = send(req, "POST /backup/patch/delta").await?;

        let body = resp.bytes().await?;
        self.counters.add_received(body.len() as u64);
        Ok(Patch::from_json(&body)?)
    }

    /// End-of-transfer signal carrying the full checksum list.
    pub async fn finish(&self, manifest: &Manifest) -> Result<()> {
        let body = ChecksumList {
            checksum_list: manifest.to_checksum_list(),
        };
        send(self.request(Method::POST, "/finish").json(&body), "POST /backup/finish").await?;
        Ok(())
    }

    async fn encode(&self, body: Vec<u8>) -> Result<(Vec<u8>, bool)> {
        if self.compression != Compression::Zstd {
            return Ok((body, false));
        }
        let compressed = tokio::task::spawn_blocking(move || zstd::encode_all(body.as_slice(), 3)).await??;
        Ok((compressed, true))
    }
}

/// Send and turn any non-2xx status into a transport error.
async fn send(req: RequestBuilder, what: &str) -> Result<Response> {
    let resp = req.send().await?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let text = resp.text().await.unwrap_or_default();
    tracing::warn!(status = status.as_u16(), "{} failed: {}", what, text);
    Err(NodeError::Transport(format!("{} returned {}: {}", what, status, text)))
}

fn header_number(resp: &Response, name: &str) -> Result<u64> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| NodeError::Protocol(format!("missing or invalid {} header", name)))
}
