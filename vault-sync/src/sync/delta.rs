//! Delta computation against a remote block-hash manifest.
//!
//! A window of `block_size` bytes slides over the new content one byte at a
//! time with a rolling weak checksum. A weak hit is confirmed with the
//! block's strong hash before a copy is emitted, then the window jumps past
//! the matched bytes. Everything not covered by a copy accumulates into
//! literal runs. Because matching is by content rather than offset, blocks
//! that moved, or that follow inserted or deleted bytes, are still found.

use crate::error::Result;
use crate::fs::checksum::content_checksum;
use crate::sync::patch::{Patch, PatchOp, PATCH_VERSION};
use crate::sync::rolling::{weak_checksum, RollingChecksum};
use crate::sync::signature::{check_block_size, strong_hash, BlockHash, BlockHashManifest};
use std::collections::HashMap;

/// Compute the patch that turns the remote's old file into `new_data`.
///
/// # Example
/// ```
/// use vault_sync::sync::{apply, block_hash, diff};
///
/// let old = b"hello";
/// let new = b"helloworld";
///
/// let hashes = block_hash(old, 5).unwrap();
/// let patch = diff(new, &hashes).unwrap();
///
/// assert_eq!(patch.literal_bytes(), 5);
/// assert_eq!(apply(old, &patch).unwrap(), new);
/// ```
pub fn diff(new_data: &[u8], remote: &BlockHashManifest) -> Result<Patch> {
    check_block_size(remote.block_size)?;
    let block_size = remote.block_size;
    let table = BlockTable::new(remote);

    let mut ops = Vec::new();
    let mut pos = 0;
    let mut literal_start = 0;
    let mut rolling: Option<RollingChecksum> = None;

    while pos + block_size <= new_data.len() {
        let window = &new_data[pos..pos + block_size];
        let weak = rolling.unwrap_or_else(|| RollingChecksum::new(window));

        if let Some(index) = table.find(weak.value(), window) {
            push_literal(&mut ops, &new_data[literal_start..pos]);
            ops.push(PatchOp::Copy { index });
            pos += block_size;
            literal_start = pos;
            rolling = None;
            continue;
        }

        rolling = if pos + block_size < new_data.len() {
            let mut next = weak;
            next.roll(new_data[pos], new_data[pos + block_size]);
            Some(next)
        } else {
            None
        };
        pos += 1;
    }

    // The old file's short final block can only line up with the very end.
    if let Some((block, len)) = table.short {
        let remaining = new_data.len() - literal_start;
        if len <= remaining {
            let start = new_data.len() - len;
            let tail = &new_data[start..];
            if weak_checksum(tail) == block.weak && strong_hash(tail) == block.strong {
                push_literal(&mut ops, &new_data[literal_start..start]);
                ops.push(PatchOp::Copy { index: block.index });
                literal_start = new_data.len();
            }
        }
    }

    push_literal(&mut ops, &new_data[literal_start..]);

    Ok(Patch {
        version: PATCH_VERSION,
        block_size,
        size: new_data.len() as u64,
        checksum: content_checksum(new_data),
        ops,
    })
}

fn push_literal(ops: &mut Vec<PatchOp>, bytes: &[u8]) {
    if !bytes.is_empty() {
        ops.push(PatchOp::Literal {
            data: bytes.to_vec(),
        });
    }
}

/// Lookup of full-size blocks by weak checksum, plus the short tail block.
struct BlockTable<'a> {
    by_weak: HashMap<u32, Vec<&'a BlockHash>>,
    short: Option<(&'a BlockHash, usize)>,
}

impl<'a> BlockTable<'a> {
    fn new(remote: &'a BlockHashManifest) -> Self {
        let mut by_weak: HashMap<u32, Vec<&BlockHash>> = HashMap::new();
        let mut short = None;
        let last_len = remote.last_block_len();
        let count = remote.blocks.len();

        for (i, block) in remote.blocks.iter().enumerate() {
            if i + 1 == count && last_len < remote.block_size {
                short = Some((block, last_len));
            } else {
                by_weak.entry(block.weak).or_default().push(block);
            }
        }

        Self { by_weak, short }
    }

    /// Block index whose weak and strong hashes both match `window`.
    fn find(&self, weak: u32, window: &[u8]) -> Option<usize> {
        let candidates = self.by_weak.get(&weak)?;
        let strong = strong_hash(window);
        candidates
            .iter()
            .find(|block| block.strong == strong)
            .map(|block| block.index)
    }
}
