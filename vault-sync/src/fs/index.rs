//! Checksum indexing of a whole vault tree.

use crate::error::Result;
use crate::fs::checksum::file_checksum;
use crate::fs::walker::walk_directory;
use crate::manifest::{FileRecord, Manifest};
use std::path::Path;

/// Build the manifest of every regular file under `root`.
///
/// Checksums cover full file content only, so permission and ownership
/// bits never affect them. A file that cannot be read aborts the whole
/// index with an I/O error rather than silently dropping out of the
/// manifest, which would otherwise be reconciled as a removal.
pub fn index(root: &Path) -> Result<Manifest> {
    let files = walk_directory(root)?;
    let mut records = Vec::with_capacity(files.len());

    for file in files {
        let checksum = file_checksum(&file.path)?;
        records.push(FileRecord {
            relative_path: file.relative_path,
            checksum,
            absolute_path: Some(file.path),
        });
    }

    tracing::debug!(root = %root.display(), files = records.len(), "Indexed vault tree");
    Manifest::new(records)
}
