//! Starts backup and restore runs and records their outcome.
//!
//! A start call performs the state transition synchronously and hands the run
//! to a background task; callers learn how it ended only by reading the job
//! record back.

use super::store::{JobMessage, JobState, JobStore};
use crate::client::BackupClient;
use crate::config::Config;
use crate::database::{VaultDatabase, DUMP_DIR};
use crate::executor::TransferPipeline;
use crate::transfer::TransferReport;
use crate::utils::errors::{NodeError, Result};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use vault_sync::fs::walker::calculate_total_size;
use vault_sync::ServiceInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunKind {
    Backup,
    Restore,
}

#[derive(Clone)]
pub struct JobController {
    store: JobStore,
    config: Arc<Config>,
    database: Arc<dyn VaultDatabase>,
    workers: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
}

impl JobController {
    pub fn new(store: JobStore, config: Arc<Config>, database: Arc<dyn VaultDatabase>) -> Self {
        let workers = Arc::new(Semaphore::new(config.jobs.max_concurrent_jobs.max(1)));
        Self {
            store,
            config,
            database,
            workers,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Runs accepted and not yet recorded as finished.
    pub fn active_jobs(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Start a backup of `identity`'s vault to `target_host`.
    ///
    /// `service` is what the target reported about its storage; the vault
    /// must fit in `service.max_storage`. Fails with `QuotaExceeded` or
    /// `Conflict` before anything is recorded.
    pub async fn start_backup(
        &self,
        identity: &str,
        target_host: &str,
        access_token: &str,
        service: &ServiceInfo,
    ) -> Result<()> {
        validate_identity(identity)?;

        let root = self.config.vault_root(identity);
        let used = tokio::task::spawn_blocking(move || calculate_total_size(&root)).await??;
        if used > service.max_storage {
            warn!(identity = %identity, used, max = service.max_storage, "Backup rejected, vault exceeds remote quota");
            return Err(NodeError::QuotaExceeded {
                used,
                max: service.max_storage,
            });
        }

        self.begin(identity, JobState::RunningBackup, target_host, access_token).await?;
        self.spawn(identity, RunKind::Backup, target_host, access_token).await
    }

    /// Start a restore of `identity`'s vault from `target_host`.
    pub async fn start_restore(&self, identity: &str, target_host: &str, access_token: &str) -> Result<()> {
        validate_identity(identity)?;

        self.begin(identity, JobState::RunningRestore, target_host, access_token).await?;
        self.spawn(identity, RunKind::Restore, target_host, access_token).await
    }

    async fn begin(&self, identity: &str, state: JobState, target_host: &str, access_token: &str) -> Result<()> {
        let store = self.store.clone();
        let (id, host, token) = (identity.to_string(), target_host.to_string(), access_token.to_string());
        let won = tokio::task::spawn_blocking(move || store.begin(&id, state, &host, &token)).await??;

        if !won {
            info!(identity = %identity, "Job already running, rejecting start");
            return Err(NodeError::Conflict(identity.to_string()));
        }
        info!(identity = %identity, state = state.as_str(), target = %target_host, "Job started");
        Ok(())
    }

    /// Hand the run to a background task. The job is already recorded as
    /// running; if the client cannot be built the record is closed as failed.
    async fn spawn(&self, identity: &str, kind: RunKind, target_host: &str, access_token: &str) -> Result<()> {
        let client = match BackupClient::new(target_host, access_token, &self.config.sync) {
            Ok(client) => client,
            Err(e) => {
                self.record_outcome(identity, JobMessage::Failed).await;
                return Err(e);
            }
        };

        let this = self.clone();
        let identity = identity.to_string();
        self.active.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            let message = this.supervise(&identity, kind, client).await;
            this.record_outcome(&identity, message).await;
            this.active.fetch_sub(1, Ordering::SeqCst);
        });
        Ok(())
    }

    /// Return the record to stopped. SQLite work stays off the async workers.
    async fn record_outcome(&self, identity: &str, message: JobMessage) {
        let store = self.store.clone();
        let id = identity.to_string();
        match tokio::task::spawn_blocking(move || store.finish(&id, message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(identity = %identity, "Failed to record job outcome: {}", e),
            Err(e) => error!(identity = %identity, "Failed to record job outcome: {}", e),
        }
    }

    /// Wait for a worker slot, then run inside its own task so that a panic
    /// ends as a failed job rather than taking the node down.
    async fn supervise(&self, identity: &str, kind: RunKind, client: BackupClient) -> JobMessage {
        let _permit = match Arc::clone(&self.workers).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!(identity = %identity, "Worker pool closed: {}", e);
                return JobMessage::Failed;
            }
        };

        let this = self.clone();
        let id = identity.to_string();
        let run = tokio::spawn(async move {
            match kind {
                RunKind::Backup => this.run_backup(&id, client).await,
                RunKind::Restore => this.run_restore(&id, client).await,
            }
        });

        match run.await {
            Ok(Ok(report)) => {
                info!(identity = %identity, "{}", report);
                JobMessage::Success
            }
            Ok(Err(e)) => {
                error!(identity = %identity, "{:?} failed: {}", kind, e);
                JobMessage::Failed
            }
            Err(e) => {
                error!(identity = %identity, "{:?} task aborted: {}", kind, e);
                JobMessage::Failed
            }
        }
    }

    async fn run_backup(&self, identity: &str, client: BackupClient) -> Result<TransferReport> {
        let root = self.config.vault_root(identity);
        tokio::fs::create_dir_all(&root).await?;
        let dump_dir = root.join(DUMP_DIR);

        self.database.export(identity, &dump_dir).await?;

        let report = TransferPipeline::new(client, &root, &self.config.sync)
            .run_backup()
            .await?;

        remove_dump(&dump_dir).await?;
        Ok(report)
    }

    async fn run_restore(&self, identity: &str, client: BackupClient) -> Result<TransferReport> {
        let root = self.config.vault_root(identity);
        tokio::fs::create_dir_all(&root).await?;

        let report = TransferPipeline::new(client, &root, &self.config.sync)
            .run_restore()
            .await?;

        let dump_dir = root.join(DUMP_DIR);
        if tokio::fs::try_exists(&dump_dir).await? {
            self.database.import(identity, &dump_dir).await?;
            remove_dump(&dump_dir).await?;
        }
        Ok(report)
    }
}

/// Identities name a directory directly under the vaults dir.
pub fn validate_identity(identity: &str) -> Result<()> {
    let bad = identity.is_empty()
        || identity == "."
        || identity == ".."
        || identity.contains(['/', '\\', '\0']);
    if bad {
        return Err(NodeError::InvalidIdentity(identity.to_string()));
    }
    Ok(())
}

async fn remove_dump(dump_dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dump_dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(NodeError::Filesystem(format!("{}: {}", dump_dir.display(), e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::NoDatabase;
    use tempfile::TempDir;

    fn controller(dir: &TempDir) -> JobController {
        let mut config = Config::default();
        config.node.vaults_dir = dir.path().join("vaults");
        config.node.db_path = dir.path().join("jobs.db");
        config.sync.connect_timeout_secs = 1;
        config.sync.request_timeout_secs = 1;

        let store = JobStore::open(&config.node.db_path).unwrap();
        JobController::new(store, Arc::new(config), Arc::new(NoDatabase))
    }

    #[test]
    fn test_validate_identity() {
        validate_identity("did:key:alice").unwrap();
        for bad in ["", ".", "..", "a/b", "a\\b", "a\0b"] {
            assert!(matches!(validate_identity(bad), Err(NodeError::InvalidIdentity(_))), "{:?}", bad);
        }
    }

    #[tokio::test]
    async fn test_quota_rejection_records_nothing() {
        let dir = TempDir::new().unwrap();
        let controller = controller(&dir);
        let root = dir.path().join("vaults/alice");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("big.bin"), vec![0u8; 100]).unwrap();

        let service = ServiceInfo {
            max_storage: 99,
            used_storage: 0,
        };
        // Nothing listens on the discard port; a network call would surface
        // as a failed job record instead of this error.
        let err = controller
            .start_backup("alice", "http://127.0.0.1:9", "t", &service)
            .await
            .unwrap_err();

        assert!(matches!(err, NodeError::QuotaExceeded { used: 100, max: 99 }));
        assert!(controller.store().get("alice").unwrap().is_none());
        assert_eq!(controller.active_jobs(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_starts_one_conflict() {
        let dir = TempDir::new().unwrap();
        let controller = controller(&dir);
        let service = ServiceInfo {
            max_storage: u64::MAX,
            used_storage: 0,
        };

        let (a, b) = tokio::join!(
            controller.start_backup("alice", "http://127.0.0.1:9", "t", &service),
            controller.start_backup("alice", "http://127.0.0.1:9", "t", &service),
        );

        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(NodeError::Conflict(_))))
                .count(),
            1
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_record_outcome_closes_the_job() {
        let dir = TempDir::new().unwrap();
        let controller = controller(&dir);
        controller
            .store()
            .begin("alice", JobState::RunningBackup, "http://h", "t")
            .unwrap();

        controller.record_outcome("alice", JobMessage::Failed).await;

        let record = controller.store().get("alice").unwrap().unwrap();
        assert_eq!(record.state, JobState::Stopped);
        assert_eq!(record.last_message, Some(JobMessage::Failed));
    }

    #[tokio::test]
    async fn test_unreachable_target_ends_failed() {
        let dir = TempDir::new().unwrap();
        let controller = controller(&dir);

        controller.start_restore("alice", "http://127.0.0.1:9", "t").await.unwrap();

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
        loop {
            let record = controller.store().get("alice").unwrap().unwrap();
            if record.state == JobState::Stopped {
                assert_eq!(record.last_message, Some(JobMessage::Failed));
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "job never finished");
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        // A stopped identity can start again
        controller.start_restore("alice", "http://127.0.0.1:9", "t").await.unwrap();
    }
}
