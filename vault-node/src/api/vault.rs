//! Backup and restore triggers, and job status for polling.

use super::AppState;
use crate::client::BackupClient;
use crate::jobs::validate_identity;
use crate::utils::errors::NodeError;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub identity: String,
    pub target_host: String,
}

#[derive(Debug, Deserialize)]
pub struct StateQuery {
    pub identity: String,
}

/// POST /vault/backup
pub async fn start_backup(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> Result<impl IntoResponse, NodeError> {
    validate_identity(&req.identity)?;
    tracing::info!(identity = %req.identity, target = %req.target_host, "Backup requested");

    let token = state.tokens.access_token(&req.identity, &req.target_host).await?;
    let service = BackupClient::new(&req.target_host, &token, &state.sync)?
        .service_info()
        .await?;

    state
        .controller
        .start_backup(&req.identity, &req.target_host, &token, &service)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(json!({ "state": "running_backup" }))))
}

/// POST /vault/restore
pub async fn start_restore(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> Result<impl IntoResponse, NodeError> {
    validate_identity(&req.identity)?;
    tracing::info!(identity = %req.identity, target = %req.target_host, "Restore requested");

    let token = state.tokens.access_token(&req.identity, &req.target_host).await?;
    state
        .controller
        .start_restore(&req.identity, &req.target_host, &token)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(json!({ "state": "running_restore" }))))
}

/// GET /vault/backup/state?identity=<id>
pub async fn job_state(
    State(state): State<AppState>,
    Query(query): Query<StateQuery>,
) -> Result<Response, NodeError> {
    validate_identity(&query.identity)?;

    let store = state.controller.store().clone();
    let identity = query.identity.clone();
    let record = tokio::task::spawn_blocking(move || store.get(&identity)).await??;

    Ok(match record {
        Some(record) => Json(record).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no job recorded for {}", query.identity) })),
        )
            .into_response(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{create_router, AppState};
    use crate::auth::StaticTokenProvider;
    use crate::config::Config;
    use crate::database::NoDatabase;
    use crate::jobs::{JobController, JobState, JobStore};
    use axum::body::Body;
    use axum::http::Request;
    use axum::Router;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn app(dir: &TempDir) -> (Router, JobController) {
        let mut config = Config::default();
        config.node.vaults_dir = dir.path().join("vaults");
        config.sync.connect_timeout_secs = 1;
        config.sync.request_timeout_secs = 1;

        let store = JobStore::open(&dir.path().join("jobs.db")).unwrap();
        let sync = config.sync.clone();
        let controller = JobController::new(store, Arc::new(config), Arc::new(NoDatabase));
        let tokens = StaticTokenProvider::new(HashMap::from([("alice".to_string(), "t".to_string())]));

        let state = AppState::new(controller.clone(), Arc::new(tokens), sync);
        (create_router(state), controller)
    }

    fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_invalid_identity_is_bad_request() {
        let dir = TempDir::new().unwrap();
        let (app, _) = app(&dir);

        let resp = app
            .oneshot(post("/vault/backup", json!({"identity": "../x", "target_host": "http://h"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_token_is_bad_gateway() {
        let dir = TempDir::new().unwrap();
        let (app, controller) = app(&dir);

        let resp = app
            .oneshot(post("/vault/backup", json!({"identity": "bob", "target_host": "http://h"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        assert!(controller.store().get("bob").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_service_info_is_bad_gateway() {
        let dir = TempDir::new().unwrap();
        let (app, controller) = app(&dir);

        let resp = app
            .oneshot(post(
                "/vault/backup",
                json!({"identity": "alice", "target_host": "http://127.0.0.1:9"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        assert!(controller.store().get("alice").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restore_conflicts_with_running_job() {
        let dir = TempDir::new().unwrap();
        let (app, controller) = app(&dir);
        // A run already holds the identity
        controller
            .store()
            .begin("alice", JobState::RunningBackup, "http://h", "t")
            .unwrap();

        let resp = app
            .clone()
            .oneshot(post(
                "/vault/restore",
                json!({"identity": "alice", "target_host": "http://127.0.0.1:9"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert!(json_body(resp).await["error"].as_str().unwrap().contains("alice"));

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/vault/backup/state?identity=alice")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let record = json_body(resp).await;
        assert_eq!(record["state"], "running_backup");
        assert!(record.get("access_token").is_none());
    }

    #[tokio::test]
    async fn test_unknown_state_is_not_found() {
        let dir = TempDir::new().unwrap();
        let (app, _) = app(&dir);

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/vault/backup/state?identity=nobody")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health_reports_active_jobs() {
        let dir = TempDir::new().unwrap();
        let (app, _) = app(&dir);

        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["active_jobs"], 0);
    }
}
