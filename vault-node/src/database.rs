//! Export and import of an identity's document database.
//!
//! The database itself is owned elsewhere; the node only asks for a dump
//! into a directory inside the vault before a backup, and loads one back
//! after a restore.

use crate::config::DatabaseConfig;
use crate::utils::errors::{NodeError, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

/// Directory, relative to the vault root, holding the database dump
pub const DUMP_DIR: &str = ".db_dump";

#[async_trait]
pub trait VaultDatabase: Send + Sync {
    async fn export(&self, identity: &str, dump_dir: &Path) -> Result<()>;
    async fn import(&self, identity: &str, dump_dir: &Path) -> Result<()>;
}

/// Runs configured external programs.
#[derive(Debug, Clone)]
pub struct CommandDatabase {
    export_command: Vec<String>,
    import_command: Vec<String>,
}

/// Vaults without a document database.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDatabase;

pub fn from_config(config: &DatabaseConfig) -> Arc<dyn VaultDatabase> {
    if config.export_command.is_empty() && config.import_command.is_empty() {
        Arc::new(NoDatabase)
    } else {
        Arc::new(CommandDatabase::new(
            config.export_command.clone(),
            config.import_command.clone(),
        ))
    }
}

impl CommandDatabase {
    pub fn new(export_command: Vec<String>, import_command: Vec<String>) -> Self {
        Self {
            export_command,
            import_command,
        }
    }

    async fn run(&self, template: &[String], identity: &str, dump_dir: &Path, what: &str) -> Result<()> {
        let args = substitute(template, identity, dump_dir);
        let Some((program, rest)) = args.split_first() else {
            tracing::debug!(identity = %identity, "No {} command configured, skipping", what);
            return Ok(());
        };

        let output = Command::new(program)
            .args(rest)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| NodeError::DatabaseExport(format!("failed to run {}: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NodeError::DatabaseExport(format!(
                "database {} for {} exited with {}: {}",
                what,
                identity,
                output.status,
                stderr.trim()
            )));
        }

        tracing::info!(identity = %identity, "Database {} complete", what);
        Ok(())
    }
}

#[async_trait]
impl VaultDatabase for CommandDatabase {
    async fn export(&self, identity: &str, dump_dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dump_dir).await.map_err(|e| {
            NodeError::DatabaseExport(format!("cannot create {}: {}", dump_dir.display(), e))
        })?;
        self.run(&self.export_command, identity, dump_dir, "export").await
    }

    async fn import(&self, identity: &str, dump_dir: &Path) -> Result<()> {
        self.run(&self.import_command, identity, dump_dir, "import").await
    }
}

#[async_trait]
impl VaultDatabase for NoDatabase {
    async fn export(&self, _identity: &str, _dump_dir: &Path) -> Result<()> {
        Ok(())
    }

    async fn import(&self, _identity: &str, _dump_dir: &Path) -> Result<()> {
        Ok(())
    }
}

fn substitute(template: &[String], identity: &str, dump_dir: &Path) -> Vec<String> {
    let dump_dir = dump_dir.to_string_lossy();
    template
        .iter()
        .map(|arg| arg.replace("{identity}", identity).replace("{dump_dir}", &dump_dir))
        .collect()
}
