//! HTTP API of the vault node: triggers runs and exposes job status.

pub mod error;
pub mod health;
pub mod vault;

use crate::auth::TokenProvider;
use crate::config::SyncConfig;
use crate::jobs::JobController;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub controller: JobController,
    pub tokens: Arc<dyn TokenProvider>,
    pub sync: Arc<SyncConfig>,
}

impl AppState {
    pub fn new(controller: JobController, tokens: Arc<dyn TokenProvider>, sync: SyncConfig) -> Self {
        Self {
            controller,
            tokens,
            sync: Arc::new(sync),
        }
    }
}

/// Create the API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/vault/backup", post(vault::start_backup))
        .route("/vault/restore", post(vault::start_restore))
        .route("/vault/backup/state", get(vault::job_state))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
