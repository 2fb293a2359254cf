//! Error types for indexing and delta coding.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Malformed manifest, block-hash listing or patch, or a patch that does
    /// not reproduce the content it claims to.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path is not valid UTF-8: {0}")]
    InvalidPath(PathBuf),
}

impl SyncError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        SyncError::Protocol(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
