//! Content checksums (BLAKE3, lowercase hex).

use crate::error::{Result, SyncError};
use std::io::Read;
use std::path::Path;

/// Checksum of an in-memory buffer.
pub fn content_checksum(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Checksum of a file's full content, read in 64KB chunks.
pub fn file_checksum(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|e| SyncError::io(path, e))?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let bytes_read = file.read(&mut buffer).map_err(|e| SyncError::io(path, e))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}
