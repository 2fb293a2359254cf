use crate::config::AppConfig;
use crate::storage::VaultStore;

pub struct AppState {
    pub config: AppConfig,
    pub store: VaultStore,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let store = VaultStore::new(config.storage_dir.clone(), config.max_storage_bytes);
        Self { config, store }
    }

    /// Identity that owns `token`, if any.
    pub fn identity_for(&self, token: &str) -> Option<&str> {
        self.config.tokens.get(token).map(String::as_str)
    }
}
