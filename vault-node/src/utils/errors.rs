//! Error taxonomy of the vault node.

use thiserror::Error;
use vault_sync::SyncError;

#[derive(Error, Debug)]
pub enum NodeError {
    /// A backup or restore is already running for this identity
    #[error("A job is already running for {0}")]
    Conflict(String),

    /// The vault does not fit in the remote quota
    #[error("Insufficient remote storage: vault uses {used} bytes, remote allows {max}")]
    QuotaExceeded { used: u64, max: u64 },

    /// Malformed manifest, block hashes or patch, or content that fails
    /// validation after transfer
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Network failure, timeout or unexpected HTTP status
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Filesystem error: {0}")]
    Filesystem(String),

    #[error("Database export error: {0}")]
    DatabaseExport(String),

    /// No access token could be obtained for the target host
    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Invalid identity: {0:?}")]
    InvalidIdentity(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Job store failure
    #[error("Database error: {0}")]
    Database(String),
}

impl From<reqwest::Error> for NodeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            NodeError::Transport(format!("request timed out: {}", e))
        } else if e.is_decode() {
            NodeError::Protocol(format!("undecodable response: {}", e))
        } else {
            NodeError::Transport(e.to_string())
        }
    }
}

impl From<SyncError> for NodeError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Protocol(m) => NodeError::Protocol(m),
            other => NodeError::Filesystem(other.to_string()),
        }
    }
}

impl From<std::io::Error> for NodeError {
    fn from(e: std::io::Error) -> Self {
        NodeError::Filesystem(e.to_string())
    }
}

impl From<rusqlite::Error> for NodeError {
    fn from(e: rusqlite::Error) -> Self {
        NodeError::Database(e.to_string())
    }
}

impl From<r2d2::Error> for NodeError {
    fn from(e: r2d2::Error) -> Self {
        NodeError::Database(e.to_string())
    }
}

impl From<config::ConfigError> for NodeError {
    fn from(e: config::ConfigError) -> Self {
        NodeError::Config(e.to_string())
    }
}

impl From<tokio::task::JoinError> for NodeError {
    fn from(e: tokio::task::JoinError) -> Self {
        NodeError::Filesystem(format!("blocking task failed: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, NodeError>;
