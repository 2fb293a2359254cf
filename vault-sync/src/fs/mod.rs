//! Filesystem side of the sync engine: walking, checksumming, indexing and
//! atomic writes.

pub mod atomic;
pub mod checksum;
pub mod index;
pub mod walker;

pub use atomic::{remove_stale_temp_files, write_atomic, AtomicFile};
pub use checksum::{content_checksum, file_checksum};
pub use index::index;
