//! Transfer pipeline - runs one backup or restore of a vault.
//!
//! Both directions follow the same fixed order:
//! 1. fetch the remote manifest
//! 2. reconcile it with a fresh index of the vault
//! 3. whole-file transfer of new paths (fanned out under a permit limit)
//! 4. delta transfer of changed paths
//! 5. deletion of removed paths
//! 6. completion signal and validation
//!
//! The first failing step aborts the run. Nothing already transferred is
//! rolled back; a retry reconciles against whatever the remote holds then.

use crate::client::BackupClient;
use crate::config::SyncConfig;
use crate::transfer::{Direction, TransferReport};
use crate::utils::errors::{NodeError, Result};
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};
use vault_sync::fs::{index, write_atomic};
use vault_sync::sync::{apply, block_hash, diff};
use vault_sync::{reconcile, DiffResult, FileRecord, Manifest};

pub struct TransferPipeline {
    client: BackupClient,
    vault_root: PathBuf,
    block_size: usize,
    concurrency: usize,
}

impl TransferPipeline {
    pub fn new(client: BackupClient, vault_root: impl Into<PathBuf>, sync: &SyncConfig) -> Self {
        Self {
            client,
            vault_root: vault_root.into(),
            block_size: sync.block_size,
            concurrency: sync.upload_concurrency.max(1),
        }
    }

    /// Make the remote store mirror the local vault.
    pub async fn run_backup(&self) -> Result<TransferReport> {
        let start = Instant::now();

        let remote = self.client.list_files().await?;
        let local = self.index_local().await?;
        info!(remote = remote.len(), local = local.len(), "Manifests ready");
        let plan = reconcile(&local, &remote);
        log_plan(Direction::Backup, &plan);

        let root = self.vault_root.clone();
        self.fan_out(&plan.new, |record| {
            let client = self.client.clone();
            let path = record
                .absolute_path
                .clone()
                .unwrap_or_else(|| root.join(&record.relative_path));
            async move {
                let size = tokio::fs::metadata(&path)
                    .await
                    .map_err(|e| NodeError::Filesystem(format!("{}: {}", path.display(), e)))?
                    .len();
                client.upload_file(&record.relative_path, &path, size).await
            }
        })
        .await?;

        for record in &plan.changed {
            self.push_patch(record).await?;
        }

        for record in &plan.removed {
            self.client.delete_file(&record.relative_path).await?;
            debug!(path = %record.relative_path, "Deleted remote file");
        }

        self.client.finish(&local).await?;
        info!(files = local.len(), "Remote store validated");

        Ok(self.report(Direction::Backup, &plan, start))
    }

    /// Make the local vault mirror the remote store.
    pub async fn run_restore(&self) -> Result<TransferReport> {
        let start = Instant::now();

        let remote = self.client.list_files().await?;
        let local = self.index_local().await?;
        info!(remote = remote.len(), local = local.len(), "Manifests ready");
        let plan = reconcile(&remote, &local);
        log_plan(Direction::Restore, &plan);

        self.fan_out(&plan.new, |record| {
            let client = self.client.clone();
            let dest = self.local_path(&record);
            async move {
                client.download_file(&record.relative_path, &dest).await?;
                Ok::<(), NodeError>(())
            }
        })
        .await?;

        for record in &plan.changed {
            self.pull_patch(record).await?;
        }

        for record in &plan.removed {
            let path = self.local_path(record);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %record.relative_path, "Deleted local file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(NodeError::Filesystem(format!("{}: {}", path.display(), e)));
                }
            }
        }

        self.verify_restore(&remote).await?;
        info!(files = remote.len(), "Local vault validated");

        Ok(self.report(Direction::Restore, &plan, start))
    }

    /// Send the patch that brings the remote copy of a changed file up to
    /// date with the local bytes as they are now.
    async fn push_patch(&self, record: &FileRecord) -> Result<()> {
        let hashes = self.client.block_hashes(&record.relative_path, self.block_size).await?;

        let path = self.local_path(record);
        let patch = tokio::task::spawn_blocking(move || -> Result<_> {
            let data = std::fs::read(&path)
                .map_err(|e| NodeError::Filesystem(format!("{}: {}", path.display(), e)))?;
            Ok(diff(&data, &hashes)?)
        })
        .await??;

        debug!(
            path = %record.relative_path,
            copies = patch.copy_count(),
            literal_bytes = patch.literal_bytes(),
            "Sending patch"
        );
        self.client.patch_file(&record.relative_path, &patch).await
    }

    /// Fetch a patch from the remote against the local copy, apply it and
    /// swap the result into place.
    async fn pull_patch(&self, record: &FileRecord) -> Result<()> {
        let path = self.local_path(record);
        let block_size = self.block_size;

        let read_path = path.clone();
        let (old, hashes) = tokio::task::spawn_blocking(move || -> Result<_> {
            let data = std::fs::read(&read_path)
                .map_err(|e| NodeError::Filesystem(format!("{}: {}", read_path.display(), e)))?;
            let hashes = block_hash(&data, block_size)?;
            Ok((data, hashes))
        })
        .await??;

        let patch = self.client.delta(&record.relative_path, &hashes).await?;
        debug!(
            path = %record.relative_path,
            copies = patch.copy_count(),
            literal_bytes = patch.literal_bytes(),
            "Applying patch"
        );

        let new = tokio::task::spawn_blocking(move || apply(&old, &patch)).await??;
        write_atomic(&path, &new).await?;
        Ok(())
    }

    /// After a restore the vault must hold exactly what the remote listed.
    async fn verify_restore(&self, remote: &Manifest) -> Result<()> {
        let after = self.index_local().await?;
        let leftover = reconcile(remote, &after);
        if leftover.is_empty() {
            return Ok(());
        }

        let sample: Vec<&str> = leftover
            .new
            .iter()
            .chain(&leftover.changed)
            .chain(&leftover.removed)
            .take(5)
            .map(|f| f.relative_path.as_str())
            .collect();
        Err(NodeError::Protocol(format!(
            "restored vault does not match remote manifest ({} missing, {} mismatched, {} extra; e.g. {})",
            leftover.new.len(),
            leftover.changed.len(),
            leftover.removed.len(),
            sample.join(", ")
        )))
    }

    /// Run `op` for every record with at most `concurrency` in flight.
    ///
    /// Returns the first error; the remaining transfers are aborted when the
    /// join set is dropped.
    async fn fan_out<F, Fut>(&self, records: &[FileRecord], op: F) -> Result<()>
    where
        F: Fn(FileRecord) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for record in records.iter().cloned() {
            let sem = Arc::clone(&semaphore);
            let transfer = op(record);
            tasks.spawn(async move {
                let _permit = sem
                    .acquire_owned()
                    .await
                    .map_err(|e| NodeError::Transport(format!("transfer slots closed: {}", e)))?;
                transfer.await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(NodeError::Transport(format!("transfer task failed: {}", e))),
            }
        }
        Ok(())
    }

    async fn index_local(&self) -> Result<Manifest> {
        let root = self.vault_root.clone();
        Ok(tokio::task::spawn_blocking(move || index(&root)).await??)
    }

    fn local_path(&self, record: &FileRecord) -> PathBuf {
        record
            .absolute_path
            .clone()
            .unwrap_or_else(|| self.vault_root.join(&record.relative_path))
    }

    fn report(&self, direction: Direction, plan: &DiffResult, start: Instant) -> TransferReport {
        let counters = self.client.counters();
        TransferReport {
            direction,
            new_files: plan.new.len(),
            changed_files: plan.changed.len(),
            removed_files: plan.removed.len(),
            bytes_sent: counters.sent.load(Ordering::Relaxed),
            bytes_received: counters.received.load(Ordering::Relaxed),
            duration: start.elapsed(),
        }
    }
}

fn log_plan(direction: Direction, plan: &DiffResult) {
    info!(
        new = plan.new.len(),
        changed = plan.changed.len(),
        removed = plan.removed.len(),
        "{:?} plan ready",
        direction
    );
}
