use std::collections::HashMap;
use std::path::PathBuf;

pub const DEFAULT_MAX_PATCH_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    /// Per-identity stores live at `<storage_dir>/<identity>`
    pub storage_dir: PathBuf,
    pub log_level: String,
    /// Quota reported to every identity through `GET /backup/service`
    pub max_storage_bytes: u64,
    /// Largest decoded patch body accepted by `POST /backup/patch/file`
    pub max_patch_bytes: u64,
    /// Access token -> identity
    pub tokens: HashMap<String, String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5000),
            storage_dir: PathBuf::from(
                std::env::var("STORAGE_DIR").unwrap_or_else(|_| "/var/lib/backup-service".into()),
            ),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            max_storage_bytes: std::env::var("MAX_STORAGE_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(500 * 1024 * 1024),
            max_patch_bytes: std::env::var("MAX_PATCH_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_PATCH_BYTES),
            tokens: std::env::var("BACKUP_TOKENS")
                .map(|v| parse_tokens(&v))
                .unwrap_or_default(),
        }
    }
}

/// Parse `token=identity,token2=identity2`. Malformed entries are skipped.
pub fn parse_tokens(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (token, identity) = pair.trim().split_once('=')?;
            let (token, identity) = (token.trim(), identity.trim());
            if token.is_empty() || identity.is_empty() {
                tracing::warn!("Ignoring malformed BACKUP_TOKENS entry");
                return None;
            }
            Some((token.to_string(), identity.to_string()))
        })
        .collect()
}
