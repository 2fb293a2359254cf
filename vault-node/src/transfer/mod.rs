//! Transfer accounting and streaming helpers.

pub mod progress;
pub mod progress_stream;

pub use progress::{format_bytes, Direction, TransferCounters, TransferReport};
pub use progress_stream::ProgressStream;
