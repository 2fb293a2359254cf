//! Vault node library
//!
//! Backs up and restores per-identity vault directories against a remote
//! backup service, moving only new content and block-level deltas.

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod daemon;
pub mod database;
pub mod executor;
pub mod jobs;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use client::BackupClient;
pub use config::Config;
pub use executor::TransferPipeline;
pub use jobs::{JobController, JobMessage, JobRecord, JobState, JobStore};
pub use utils::errors::{NodeError, Result};
