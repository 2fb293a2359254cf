//! Temp-file-then-rename writes.
//!
//! Content lands in a hidden sibling of the destination and is renamed
//! into place only once fully written and synced, so a reader sees either
//! the previous file or the complete new one.

use crate::error::{Result, SyncError};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;
use walkdir::WalkDir;

/// File name prefix of in-flight writes. The walker never reports these.
pub const TEMP_PREFIX: &str = ".vsync-tmp-";

pub fn is_temp_file(name: &OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with(TEMP_PREFIX))
}

fn temp_path_for(dest: &Path) -> PathBuf {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!("{}{}", TEMP_PREFIX, Uuid::new_v4().simple()))
}

/// A file being written at a temporary path next to its destination.
///
/// Dropping it without calling [`AtomicFile::commit`] removes the
/// temporary file and leaves the destination untouched.
pub struct AtomicFile {
    dest: PathBuf,
    temp: PathBuf,
    file: Option<tokio::fs::File>,
}

impl AtomicFile {
    /// Open a temporary file for `dest`, creating missing parent directories.
    pub async fn create(dest: &Path) -> Result<Self> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::io(parent, e))?;
        }

        let temp = temp_path_for(dest);
        let file = tokio::fs::File::create(&temp)
            .await
            .map_err(|e| SyncError::io(&temp, e))?;

        Ok(Self {
            dest: dest.to_path_buf(),
            temp,
            file: Some(file),
        })
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| SyncError::io(&self.temp, closed()))?;
        file.write_all(buf)
            .await
            .map_err(|e| SyncError::io(&self.temp, e))
    }

    /// Flush, sync and rename into place.
    pub async fn commit(mut self) -> Result<()> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| SyncError::io(&self.temp, closed()))?;

        let synced = async {
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        drop(file);

        let result = match synced {
            Ok(()) => tokio::fs::rename(&self.temp, &self.dest).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&self.temp).await;
            return Err(SyncError::io(&self.dest, e));
        }

        Ok(())
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            let _ = std::fs::remove_file(&self.temp);
        }
    }
}

fn closed() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, "atomic file already committed")
}

/// Write `data` to `dest` atomically.
pub async fn write_atomic(dest: &Path, data: &[u8]) -> Result<()> {
    let mut file = AtomicFile::create(dest).await?;
    file.write_all(data).await?;
    file.commit().await
}

/// Delete temporary files left behind by interrupted writes under `root`.
///
/// Returns how many were removed. A missing root has nothing to clean.
pub fn remove_stale_temp_files(root: &Path) -> Result<usize> {
    if !root.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            SyncError::io(path, e.into())
        })?;
        if entry.file_type().is_file() && is_temp_file(entry.file_name()) {
            std::fs::remove_file(entry.path()).map_err(|e| SyncError::io(entry.path(), e))?;
            tracing::debug!(path = %entry.path().display(), "Removed stale temp file");
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_atomic_creates_parents() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("a/b/c.txt");

        write_atomic(&dest, b"hello").await?;

        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");
        Ok(())
    }

    #[tokio::test]
    async fn test_replaces_existing_file() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("x.txt");
        std::fs::write(&dest, b"old").unwrap();

        write_atomic(&dest, b"new content").await?;

        assert_eq!(std::fs::read(&dest).unwrap(), b"new content");
        Ok(())
    }

    #[tokio::test]
    async fn test_uncommitted_write_leaves_no_trace() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("x.txt");
        std::fs::write(&dest, b"old").unwrap();

        {
            let mut file = AtomicFile::create(&dest).await?;
            file.write_all(b"partial").await?;
        }

        assert_eq!(std::fs::read(&dest).unwrap(), b"old");
        let entries: Vec<_> = std::fs::read_dir(temp_dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        Ok(())
    }

    #[test]
    fn test_remove_stale_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("sub")).unwrap();
        std::fs::write(temp_dir.path().join("keep.txt"), b"k").unwrap();
        std::fs::write(temp_dir.path().join("sub/.vsync-tmp-1234"), b"partial").unwrap();

        assert_eq!(remove_stale_temp_files(temp_dir.path()).unwrap(), 1);
        assert!(temp_dir.path().join("keep.txt").exists());
        assert!(!temp_dir.path().join("sub/.vsync-tmp-1234").exists());

        assert_eq!(remove_stale_temp_files(&temp_dir.path().join("missing")).unwrap(), 0);
    }

    #[test]
    fn test_is_temp_file() {
        assert!(is_temp_file(OsStr::new(".vsync-tmp-abc")));
        assert!(!is_temp_file(OsStr::new("notes.txt")));
    }
}
