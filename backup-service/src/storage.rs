//! Per-identity file store.
//!
//! Each identity owns one directory under the storage root. Every write goes
//! through a temp file and rename, so a reader never sees a partial file.
//!
//! Usage per identity is walked from disk once and then kept as a running
//! figure that writes and deletes adjust. `finish` re-walks and resets it.

use crate::error::AppError;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt};
use vault_sync::fs::walker::calculate_total_size;
use vault_sync::fs::{index, remove_stale_temp_files, AtomicFile};
use vault_sync::manifest::validate_relative_path;
use vault_sync::sync::{apply, block_hash, diff};
use vault_sync::{BlockHashManifest, Manifest, Patch};

const COPY_BUF_SIZE: usize = 64 * 1024;

#[derive(Debug)]
pub struct VaultStore {
    root: PathBuf,
    max_storage: u64,
    usage: DashMap<String, u64>,
}

impl VaultStore {
    pub fn new(root: impl Into<PathBuf>, max_storage: u64) -> Self {
        Self {
            root: root.into(),
            max_storage,
            usage: DashMap::new(),
        }
    }

    pub fn identity_root(&self, identity: &str) -> Result<PathBuf, AppError> {
        let bad = identity.is_empty()
            || identity == "."
            || identity == ".."
            || identity.contains(['/', '\\', '\0']);
        if bad {
            return Err(AppError::BadRequest(format!("invalid identity {:?}", identity)));
        }
        Ok(self.root.join(identity))
    }

    /// Absolute location of `relative` inside the identity's store.
    pub fn resolve(&self, identity: &str, relative: &str) -> Result<PathBuf, AppError> {
        validate_relative_path(relative)?;
        Ok(self.identity_root(identity)?.join(relative))
    }

    pub fn manifest(&self, identity: &str) -> Result<Manifest, AppError> {
        Ok(index(&self.identity_root(identity)?)?)
    }

    pub async fn used_bytes(&self, identity: &str) -> Result<u64, AppError> {
        let cached = self.usage.get(identity).map(|used| *used);
        if let Some(used) = cached {
            return Ok(used);
        }

        let root = self.identity_root(identity)?;
        let walked = tokio::task::spawn_blocking(move || calculate_total_size(&root)).await??;
        Ok(*self.usage.entry(identity.to_string()).or_insert(walked))
    }

    pub async fn write(&self, identity: &str, relative: &str, data: &[u8]) -> Result<u64, AppError> {
        self.write_from(identity, relative, data).await
    }

    /// Copy `reader` into `relative` and return the number of bytes stored.
    ///
    /// Bytes are counted as they arrive; once the identity would go over its
    /// quota the write stops with `InsufficientStorage` and the previous
    /// content of `relative` is kept.
    pub async fn write_from<R>(&self, identity: &str, relative: &str, mut reader: R) -> Result<u64, AppError>
    where
        R: AsyncRead + Unpin,
    {
        let dest = self.resolve(identity, relative)?;
        let used = self.used_bytes(identity).await?;
        let replaced = existing_len(&dest).await;
        let others = used.saturating_sub(replaced);
        let allowance = self.max_storage.saturating_sub(others);

        let mut file = AtomicFile::create(&dest).await?;
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        let mut written = 0u64;
        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|e| AppError::BadRequest(format!("Failed to read request body: {}", e)))?;
            if n == 0 {
                break;
            }
            written += n as u64;
            if written > allowance {
                return Err(quota_exceeded(others.saturating_add(written), self.max_storage));
            }
            file.write_all(&buf[..n]).await?;
        }

        self.reserve(identity, replaced, written)?;
        if let Err(e) = file.commit().await {
            self.usage.remove(identity);
            return Err(e.into());
        }
        Ok(written)
    }

    /// Move the running figure from `replaced` to `incoming` bytes for one
    /// file, unless that takes the identity over quota.
    fn reserve(&self, identity: &str, replaced: u64, incoming: u64) -> Result<(), AppError> {
        let mut used = self.usage.entry(identity.to_string()).or_insert(0);
        let after = used.saturating_sub(replaced).saturating_add(incoming);
        if after > self.max_storage {
            return Err(quota_exceeded(after, self.max_storage));
        }
        *used = after;
        Ok(())
    }

    pub async fn delete(&self, identity: &str, relative: &str) -> Result<(), AppError> {
        let path = self.resolve(identity, relative)?;
        let size = existing_len(&path).await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                if let Some(mut used) = self.usage.get_mut(identity) {
                    *used = used.saturating_sub(size);
                }
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("{} not found", relative)))
            }
            Err(e) => Err(AppError::Internal(anyhow::anyhow!(
                "Failed to delete {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Block hashes of the stored copy of `relative`.
    pub async fn block_hashes(
        &self,
        identity: &str,
        relative: &str,
        block_size: usize,
    ) -> Result<BlockHashManifest, AppError> {
        let data = self.read_existing(identity, relative).await?;
        Ok(block_hash(&data, block_size)?)
    }

    /// Rebuild `relative` from its stored copy and `patch`, then replace it.
    pub async fn apply_patch(&self, identity: &str, relative: &str, patch: &Patch) -> Result<u64, AppError> {
        let old = self.read_existing(identity, relative).await?;

        // The declared size is checked by `apply`; refuse it before doing the work
        let others = self.used_bytes(identity).await?.saturating_sub(old.len() as u64);
        if others.saturating_add(patch.size) > self.max_storage {
            return Err(quota_exceeded(others.saturating_add(patch.size), self.max_storage));
        }

        let patch = patch.clone();
        let new = tokio::task::spawn_blocking(move || apply(&old, &patch)).await??;
        self.write(identity, relative, &new).await
    }

    /// Patch that turns the caller's copy (described by `remote`) into the
    /// stored content of `relative`.
    pub async fn delta_for(
        &self,
        identity: &str,
        relative: &str,
        remote: BlockHashManifest,
    ) -> Result<Patch, AppError> {
        let data = self.read_existing(identity, relative).await?;
        Ok(tokio::task::spawn_blocking(move || diff(&data, &remote)).await??)
    }

    /// Drop leftover temp files and check the store against the list the
    /// sender believes it transferred.
    pub fn finish(&self, identity: &str, expected: &Manifest) -> Result<(), AppError> {
        let root = self.identity_root(identity)?;
        let removed = remove_stale_temp_files(&root)?;
        if removed > 0 {
            tracing::info!(identity = %identity, removed, "Removed stale temp files");
        }

        let actual = index(&root)?;
        self.usage.insert(identity.to_string(), calculate_total_size(&root)?);

        let problems = compare(expected, &actual);
        if !problems.is_empty() {
            tracing::warn!(identity = %identity, mismatches = problems.len(), "Backup validation failed");
            return Err(AppError::BadRequest(format!(
                "store does not match checksum list: {}",
                problems.join(", ")
            )));
        }
        Ok(())
    }

    async fn read_existing(&self, identity: &str, relative: &str) -> Result<Vec<u8>, AppError> {
        let path = self.resolve(identity, relative)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("{} not found", relative)))
            }
            Err(e) => Err(AppError::Internal(anyhow::anyhow!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

async fn existing_len(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

fn quota_exceeded(after: u64, max: u64) -> AppError {
    AppError::InsufficientStorage(format!("storage quota exceeded: {} of {} bytes", after, max))
}

/// Human-readable differences between the expected and actual manifests.
fn compare(expected: &Manifest, actual: &Manifest) -> Vec<String> {
    let diff = vault_sync::reconcile(expected, actual);
    diff.new
        .iter()
        .map(|f| format!("missing {}", f.relative_path))
        .chain(diff.changed.iter().map(|f| format!("mismatch {}", f.relative_path)))
        .chain(diff.removed.iter().map(|f| format!("extra {}", f.relative_path)))
        .collect()
}
