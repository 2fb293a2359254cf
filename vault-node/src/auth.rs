//! Access tokens for the remote backup service.
//!
//! Obtaining a token (challenge/response with the target host) belongs to
//! the surrounding node; the pipeline only needs an opaque bearer string.

use crate::utils::errors::{NodeError, Result};
use async_trait::async_trait;
use std::collections::HashMap;

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Token `identity` presents to the backup service at `target_host`.
    async fn access_token(&self, identity: &str, target_host: &str) -> Result<String>;
}

/// Tokens provisioned ahead of time, one per identity.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenProvider {
    tokens: HashMap<String, String>,
}

impl StaticTokenProvider {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self, identity: &str, target_host: &str) -> Result<String> {
        self.tokens.get(identity).cloned().ok_or_else(|| {
            NodeError::Authentication(format!(
                "no access token for {} at {}",
                identity, target_host
            ))
        })
    }
}
