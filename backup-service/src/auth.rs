//! Access-token authentication.
//!
//! Requests carry `Authorization: token <t>` (or `Bearer <t>`); the token
//! maps to exactly one identity, whose store the request operates on.

use crate::error::AppError;
use crate::state::AppState;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use std::sync::Arc;

/// The identity a request was authenticated as.
#[derive(Debug, Clone)]
pub struct Identity(pub String);

impl FromRequestParts<Arc<AppState>> for Identity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("Missing authorization header".into()))?;

        let token = parse_token(header)
            .ok_or_else(|| AppError::Unauthorized("Malformed authorization header".into()))?;

        state
            .identity_for(token)
            .map(|id| Identity(id.to_string()))
            .ok_or_else(|| AppError::Unauthorized("Unknown access token".into()))
    }
}

fn parse_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    let known = scheme.eq_ignore_ascii_case("token") || scheme.eq_ignore_ascii_case("bearer");
    (known && !token.is_empty()).then_some(token)
}
