//! HTTP mapping of node errors.

use crate::utils::errors::NodeError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

impl NodeError {
    pub fn status(&self) -> StatusCode {
        match self {
            NodeError::Conflict(_) => StatusCode::CONFLICT,
            NodeError::QuotaExceeded { .. } => StatusCode::INSUFFICIENT_STORAGE,
            NodeError::InvalidIdentity(_) => StatusCode::BAD_REQUEST,
            // The target host or our credentials for it are at fault
            NodeError::Authentication(_) | NodeError::Transport(_) | NodeError::Protocol(_) => {
                StatusCode::BAD_GATEWAY
            }
            NodeError::Filesystem(_)
            | NodeError::DatabaseExport(_)
            | NodeError::Config(_)
            | NodeError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for NodeError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "Request failed: {}", self);
        } else {
            tracing::warn!(status = status.as_u16(), "Request rejected: {}", self);
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
