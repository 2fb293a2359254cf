//! Manifest types: the path + checksum listing of one side of a vault.
//!
//! On the wire a manifest is a list of `[checksum, relative_path]` pairs,
//! both in the `GET /backup/files` response and in the `POST /backup/finish`
//! body.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One regular file of a vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Forward-slash path relative to the vault root
    pub relative_path: String,

    /// Lowercase hex BLAKE3 of the full content
    pub checksum: String,

    /// Location on the local disk; only known for the side that indexed it
    #[serde(skip)]
    pub absolute_path: Option<PathBuf>,
}

impl FileRecord {
    pub fn remote(relative_path: impl Into<String>, checksum: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            checksum: checksum.into(),
            absolute_path: None,
        }
    }
}

/// Ordered set of file records, unique by relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    files: Vec<FileRecord>,
}

impl Manifest {
    /// Build a manifest, sorting by path and rejecting duplicate paths.
    pub fn new(mut files: Vec<FileRecord>) -> Result<Self> {
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        if let Some(dup) = files
            .windows(2)
            .find(|w| w[0].relative_path == w[1].relative_path)
        {
            return Err(SyncError::protocol(format!(
                "duplicate path in manifest: {}",
                dup[0].relative_path
            )));
        }
        Ok(Self { files })
    }

    pub fn files(&self) -> &[FileRecord] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, relative_path: &str) -> Option<&FileRecord> {
        self.files
            .binary_search_by(|f| f.relative_path.as_str().cmp(relative_path))
            .ok()
            .map(|i| &self.files[i])
    }

    /// `[checksum, relative_path]` pairs in path order.
    pub fn to_checksum_list(&self) -> Vec<(String, String)> {
        self.files
            .iter()
            .map(|f| (f.checksum.clone(), f.relative_path.clone()))
            .collect()
    }

    /// Parse a wire listing received from the other side.
    pub fn from_checksum_list(list: Vec<(String, String)>) -> Result<Self> {
        let mut files = Vec::with_capacity(list.len());
        for (checksum, relative_path) in list {
            validate_relative_path(&relative_path)?;
            if checksum.is_empty() {
                return Err(SyncError::protocol(format!(
                    "empty checksum for {}",
                    relative_path
                )));
            }
            files.push(FileRecord::remote(relative_path, checksum));
        }
        Self::new(files)
    }
}

/// Reject paths that could escape a vault root or are not in canonical
/// forward-slash form.
pub fn validate_relative_path(path: &str) -> Result<()> {
    let bad = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path.contains('\0')
        || path
            .split('/')
            .any(|c| c.is_empty() || c == "." || c == "..");
    if bad {
        return Err(SyncError::protocol(format!("invalid relative path: {:?}", path)));
    }
    Ok(())
}

/// Body of `GET /backup/files`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupFiles {
    pub backup_files: Vec<(String, String)>,
}

/// Body of `POST /backup/finish`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChecksumList {
    pub checksum_list: Vec<(String, String)>,
}

/// Body of `GET /backup/service`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub max_storage: u64,
    pub used_storage: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_sorted_and_lookup() {
        let manifest = Manifest::new(vec![
            FileRecord::remote("b.txt", "2"),
            FileRecord::remote("a/c.txt", "1"),
        ])
        .unwrap();

        assert_eq!(manifest.files()[0].relative_path, "a/c.txt");
        assert_eq!(manifest.get("b.txt").map(|f| f.checksum.as_str()), Some("2"));
        assert!(manifest.get("missing").is_none());
    }

    #[test]
    fn test_duplicate_paths_rejected() {
        let result = Manifest::new(vec![
            FileRecord::remote("x", "1"),
            FileRecord::remote("x", "2"),
        ]);
        assert!(matches!(result, Err(SyncError::Protocol(_))));
    }

    #[test]
    fn test_wire_format_is_checksum_then_path() {
        let manifest = Manifest::new(vec![FileRecord::remote("x.txt", "abc")]).unwrap();
        let body = BackupFiles {
            backup_files: manifest.to_checksum_list(),
        };

        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, r#"{"backup_files":[["abc","x.txt"]]}"#);
    }

    #[test]
    fn test_unsafe_paths_rejected() {
        for path in ["", "/etc/passwd", "../x", "a/../b", "a//b", "a\\b", "./a"] {
            assert!(validate_relative_path(path).is_err(), "accepted {:?}", path);
        }
        assert!(validate_relative_path("dir/sub/file.bin").is_ok());
        assert!(validate_relative_path(".hidden").is_ok());
    }

    #[test]
    fn test_from_checksum_list_rejects_traversal() {
        let result = Manifest::from_checksum_list(vec![("abc".into(), "../escape".into())]);
        assert!(result.is_err());
    }
}
