//! Patch application to reconstruct files.
//!
//! This module replays a patch against the old content held by the
//! receiving side.

use crate::error::{Result, SyncError};
use crate::fs::checksum::content_checksum;
use crate::sync::patch::{Patch, PatchOp};
use crate::sync::signature::{check_block_size, BlockHashManifest};

/// Apply a patch to the old content and return the reconstructed file.
///
/// Every copy index is checked against the old content's block count
/// before any output is produced. The result must match the length and
/// checksum recorded in the patch; any mismatch is a protocol error and
/// nothing is returned, so callers never persist a corrupt file.
///
/// # Example
/// ```
/// use vault_sync::sync::{apply, block_hash, diff};
///
/// let baseline = b"Hello, World!";
/// let modified = b"Hello, Rust!";
///
/// let patch = diff(modified, &block_hash(baseline, 4).unwrap()).unwrap();
/// let reconstructed = apply(baseline, &patch).unwrap();
/// assert_eq!(reconstructed, modified);
/// ```
pub fn apply(old_data: &[u8], patch: &Patch) -> Result<Vec<u8>> {
    check_block_size(patch.block_size)?;
    let block_size = patch.block_size;
    let block_count = BlockHashManifest::block_count_for(old_data.len() as u64, block_size);

    if let Some(index) = patch.ops.iter().find_map(|op| match op {
        PatchOp::Copy { index } if *index >= block_count => Some(*index),
        _ => None,
    }) {
        return Err(SyncError::protocol(format!(
            "patch references block {} but the old file has {} blocks",
            index, block_count
        )));
    }

    // Length the ops produce, known before anything is allocated
    let produced: u64 = patch
        .ops
        .iter()
        .map(|op| match op {
            PatchOp::Copy { index } => {
                let start = index * block_size;
                ((start + block_size).min(old_data.len()) - start) as u64
            }
            PatchOp::Literal { data } => data.len() as u64,
        })
        .sum();
    if produced != patch.size {
        return Err(SyncError::protocol(format!(
            "patch produces {} bytes but declares {}",
            produced, patch.size
        )));
    }

    let mut output = Vec::with_capacity(produced as usize);
    for op in &patch.ops {
        match op {
            PatchOp::Copy { index } => {
                let start = index * block_size;
                let end = (start + block_size).min(old_data.len());
                output.extend_from_slice(&old_data[start..end]);
            }
            PatchOp::Literal { data } => output.extend_from_slice(data),
        }
    }

    if output.len() as u64 != patch.size {
        return Err(SyncError::protocol(format!(
            "patched size {} does not match expected {}",
            output.len(),
            patch.size
        )));
    }

    let checksum = content_checksum(&output);
    if checksum != patch.checksum {
        return Err(SyncError::protocol(format!(
            "checksum mismatch after applying patch: expected {}, got {}",
            patch.checksum, checksum
        )));
    }

    Ok(output)
}
