//! Vault Sync Library
//!
//! Building blocks shared by the vault node and the backup service:
//! checksum indexing of a vault tree, the rsync-style delta codec, and
//! reconciliation of two manifests into new/changed/removed path sets.

pub mod error;
pub mod fs;
pub mod manifest;
pub mod reconcile;
pub mod sync;

// Re-export commonly used types
pub use error::{Result, SyncError};
pub use manifest::{FileRecord, Manifest, ServiceInfo};
pub use reconcile::{reconcile, DiffResult};
pub use sync::patch::{Patch, PatchOp};
pub use sync::signature::{BlockHash, BlockHashManifest};

/// Default block size used for delta transfer (4KB)
pub const DEFAULT_BLOCK_SIZE: usize = 4096;
