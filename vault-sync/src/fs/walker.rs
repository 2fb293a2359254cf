//! Directory traversal over a vault root.
//!
//! Only regular files are reported. Directories and symlinks are skipped,
//! and so are temporary files left behind by interrupted atomic writes.

use crate::error::{Result, SyncError};
use crate::fs::atomic::is_temp_file;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Information about a file discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Forward-slash path relative to the root
    pub relative_path: String,

    /// File size in bytes
    pub size: u64,
}

/// Walk a directory tree and collect all regular files, sorted by path.
///
/// A missing root yields an empty list. Any other traversal error aborts
/// the walk.
///
/// # Example
/// ```no_run
/// use vault_sync::fs::walker::walk_directory;
/// use std::path::Path;
///
/// let files = walk_directory(Path::new("/data/vaults/alice")).unwrap();
/// println!("Found {} files", files.len());
/// ```
pub fn walk_directory(root: &Path) -> Result<Vec<FileInfo>> {
    let mut files = Vec::new();

    if !root.exists() {
        return Ok(files);
    }

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            SyncError::io(path, e.into())
        })?;

        if !entry.file_type().is_file() || is_temp_file(entry.file_name()) {
            continue;
        }

        let metadata = entry
            .metadata()
            .map_err(|e| SyncError::io(entry.path(), e.into()))?;

        files.push(FileInfo {
            relative_path: relative_posix(root, entry.path())?,
            path: entry.into_path(),
            size: metadata.len(),
        });
    }

    Ok(files)
}

/// Calculate total size of all regular files under a root
pub fn calculate_total_size(root: &Path) -> Result<u64> {
    Ok(walk_directory(root)?.iter().map(|f| f.size).sum())
}

/// Render `path` relative to `root` with `/` separators regardless of host.
pub fn relative_posix(root: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| SyncError::InvalidPath(path.to_path_buf()))?;

    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(name) => {
                let name = name
                    .to_str()
                    .ok_or_else(|| SyncError::InvalidPath(path.to_path_buf()))?;
                parts.push(name);
            }
            _ => return Err(SyncError::InvalidPath(path.to_path_buf())),
        }
    }

    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_walk_empty_directory() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let files = walk_directory(temp_dir.path())?;
        assert_eq!(files.len(), 0);
        Ok(())
    }

    #[test]
    fn test_walk_missing_root() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let files = walk_directory(&temp_dir.path().join("nope"))?;
        assert!(files.is_empty());
        Ok(())
    }

    #[test]
    fn test_walk_with_subdirectories() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();

        fs::create_dir(temp_dir.path().join("subdir")).unwrap();
        fs::write(temp_dir.path().join("file1.txt"), b"content1").unwrap();
        fs::write(temp_dir.path().join("subdir/file2.txt"), b"content2").unwrap();

        let files = walk_directory(temp_dir.path())?;
        let paths: Vec<_> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["file1.txt", "subdir/file2.txt"]);

        Ok(())
    }

    #[test]
    fn test_temp_files_skipped() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();

        fs::write(temp_dir.path().join("keep.txt"), b"keep").unwrap();
        fs::write(temp_dir.path().join(".vsync-tmp-1234"), b"partial").unwrap();

        let files = walk_directory(temp_dir.path())?;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "keep.txt");

        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_symlinks_skipped() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();

        fs::write(temp_dir.path().join("target.txt"), b"data").unwrap();
        std::os::unix::fs::symlink(
            temp_dir.path().join("target.txt"),
            temp_dir.path().join("link.txt"),
        )
        .unwrap();

        let files = walk_directory(temp_dir.path())?;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "target.txt");

        Ok(())
    }

    #[test]
    fn test_calculate_total_size() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();

        fs::write(temp_dir.path().join("file1.txt"), b"12345").unwrap(); // 5 bytes
        fs::write(temp_dir.path().join("file2.txt"), b"1234567").unwrap(); // 7 bytes

        let total = calculate_total_size(temp_dir.path())?;
        assert_eq!(total, 12);

        Ok(())
    }
}
