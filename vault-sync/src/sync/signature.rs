//! Block-hash manifests, served by the side holding the old version.
//!
//! A file is split into fixed-size blocks (the last may be short) and every
//! block gets a weak rolling checksum plus a strong BLAKE3 hash.
//!
//! Wire form, one line per block in index order:
//!
//! ```text
//! <block_index>,<weak as 8 hex digits>:<strong as hex>
//! ```
//!
//! The block size and the old file's length travel alongside as the
//! `x-block-size` / `x-file-size` headers.

use crate::error::{Result, SyncError};
use crate::sync::rolling::weak_checksum;
use std::fmt::Write as _;

pub const BLOCK_SIZE_HEADER: &str = "x-block-size";
pub const FILE_SIZE_HEADER: &str = "x-file-size";

/// Checksums of one block of the old file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHash {
    pub index: usize,
    pub weak: u32,
    pub strong: String,
}

/// Per-file table of block checksums
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHashManifest {
    pub block_size: usize,
    pub file_size: u64,
    pub blocks: Vec<BlockHash>,
}

pub(crate) fn strong_hash(block: &[u8]) -> String {
    blake3::hash(block).to_hex().to_string()
}

pub(crate) fn check_block_size(block_size: usize) -> Result<()> {
    if block_size == 0 {
        return Err(SyncError::protocol("block size must be positive"));
    }
    Ok(())
}

/// Compute the block-hash manifest of a buffer.
///
/// # Example
/// ```
/// use vault_sync::sync::block_hash;
///
/// let manifest = block_hash(b"hello world", 5).unwrap();
/// assert_eq!(manifest.blocks.len(), 3); // "hello", " worl", "d"
/// ```
pub fn block_hash(data: &[u8], block_size: usize) -> Result<BlockHashManifest> {
    check_block_size(block_size)?;

    let blocks = data
        .chunks(block_size)
        .enumerate()
        .map(|(index, chunk)| BlockHash {
            index,
            weak: weak_checksum(chunk),
            strong: strong_hash(chunk),
        })
        .collect();

    Ok(BlockHashManifest {
        block_size,
        file_size: data.len() as u64,
        blocks,
    })
}

impl BlockHashManifest {
    /// Number of blocks a file of `file_size` bytes splits into.
    pub fn block_count_for(file_size: u64, block_size: usize) -> usize {
        (file_size as usize).div_ceil(block_size)
    }

    /// Length of the final block, which is shorter than `block_size` unless
    /// the file length is an exact multiple of it.
    pub fn last_block_len(&self) -> usize {
        match self.file_size as usize % self.block_size {
            0 if self.file_size > 0 => self.block_size,
            rem => rem,
        }
    }

    /// Serialize to the line-oriented wire form.
    pub fn to_lines(&self) -> String {
        let mut out = String::with_capacity(self.blocks.len() * 80);
        for block in &self.blocks {
            let _ = writeln!(out, "{},{:08x}:{}", block.index, block.weak, block.strong);
        }
        out
    }

    /// Parse the wire form. Indexes must run 0, 1, 2, ... and the number of
    /// lines must match what `file_size` and `block_size` imply.
    pub fn parse_lines(body: &str, block_size: usize, file_size: u64) -> Result<Self> {
        check_block_size(block_size)?;

        let mut blocks = Vec::new();
        for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
            blocks.push(parse_line(line, blocks.len())?);
        }

        let expected = Self::block_count_for(file_size, block_size);
        if blocks.len() != expected {
            return Err(SyncError::protocol(format!(
                "expected {} block hashes for {} bytes, got {}",
                expected,
                file_size,
                blocks.len()
            )));
        }

        Ok(Self {
            block_size,
            file_size,
            blocks,
        })
    }
}

fn parse_line(line: &str, expected_index: usize) -> Result<BlockHash> {
    let malformed = || SyncError::protocol(format!("malformed block hash line: {:?}", line));

    let (index, hash) = line.split_once(',').ok_or_else(malformed)?;
    let index: usize = index.parse().map_err(|_| malformed())?;
    if index != expected_index {
        return Err(SyncError::protocol(format!(
            "block index {} out of sequence, expected {}",
            index, expected_index
        )));
    }

    let (weak, strong) = hash.split_once(':').ok_or_else(malformed)?;
    let weak = u32::from_str_radix(weak, 16).map_err(|_| malformed())?;
    if strong.is_empty() || hex::decode(strong).is_err() {
        return Err(malformed());
    }

    Ok(BlockHash {
        index,
        weak,
        strong: strong.to_ascii_lowercase(),
    })
}
