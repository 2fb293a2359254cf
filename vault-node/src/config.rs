//! Configuration management for the vault node.
//!
//! Loads an optional TOML file, then applies `VAULT_NODE__SECTION__KEY`
//! environment overrides. Every key has a default.

use crate::utils::errors::{NodeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "VAULT_NODE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// HTTP API port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Vault of identity `id` lives at `<vaults_dir>/<id>`
    #[serde(default = "default_vaults_dir")]
    pub vaults_dir: PathBuf,

    /// SQLite job store
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Zstd,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Delta block size in bytes
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Parallel whole-file transfers within one run
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: usize,

    /// Request body compression
    #[serde(default = "default_compression")]
    pub compression: Compression,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Runs executing at once across all identities
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

/// External commands that dump and load an identity's document database.
///
/// Each is a program followed by its arguments; `{identity}` and
/// `{dump_dir}` are substituted. Empty means the vault has no database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub export_command: Vec<String>,
    #[serde(default)]
    pub import_command: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Access token presented to backup services, per identity
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_port() -> u16 {
    9990
}

fn default_vaults_dir() -> PathBuf {
    PathBuf::from("/var/lib/vault-node/vaults")
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/vault-node/jobs.db")
}

fn default_block_size() -> usize {
    vault_sync::DEFAULT_BLOCK_SIZE
}

fn default_upload_concurrency() -> usize {
    4
}

fn default_compression() -> Compression {
    Compression::Zstd
}

fn default_request_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            vaults_dir: default_vaults_dir(),
            db_path: default_db_path(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            upload_concurrency: default_upload_concurrency(),
            compression: default_compression(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load the optional TOML file, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }

        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without consulting the environment.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| NodeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync.block_size == 0 {
            return Err(NodeError::Config("sync.block_size must be positive".into()));
        }
        if self.sync.upload_concurrency == 0 {
            return Err(NodeError::Config("sync.upload_concurrency must be positive".into()));
        }
        if self.jobs.max_concurrent_jobs == 0 {
            return Err(NodeError::Config("jobs.max_concurrent_jobs must be positive".into()));
        }
        Ok(())
    }

    /// Root directory of one identity's vault.
    pub fn vault_root(&self, identity: &str) -> PathBuf {
        self.node.vaults_dir.join(identity)
    }
}
