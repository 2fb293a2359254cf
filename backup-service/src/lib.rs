//! Backup Service Library
//!
//! Receiving side of vault backups. Serves the `/backup/*` HTTP surface over
//! a per-identity file store: manifest listing, whole-file transfer, block
//! hashes and patch application for changed files, and end-of-transfer
//! validation.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod storage;

pub use config::AppConfig;
pub use error::AppError;
pub use routes::create_router;
pub use state::AppState;
