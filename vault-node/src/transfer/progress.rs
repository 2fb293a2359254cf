//! Transfer accounting for backup and restore runs.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Backup,
    Restore,
}

/// Live byte counters shared by the concurrent transfers of one run.
#[derive(Debug, Clone, Default)]
pub struct TransferCounters {
    pub sent: Arc<AtomicU64>,
    pub received: Arc<AtomicU64>,
}

impl TransferCounters {
    pub fn add_received(&self, n: u64) {
        self.received.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_sent(&self, n: u64) {
        self.sent.fetch_add(n, Ordering::Relaxed);
    }
}

/// Summary of one completed run.
#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    pub direction: Direction,
    pub new_files: usize,
    pub changed_files: usize,
    pub removed_files: usize,
    /// Bytes on the wire towards the backup service
    pub bytes_sent: u64,
    /// Bytes on the wire from the backup service
    pub bytes_received: u64,
    pub duration: Duration,
}

impl TransferReport {
    pub fn is_noop(&self) -> bool {
        self.new_files == 0 && self.changed_files == 0 && self.removed_files == 0
    }
}

impl fmt::Display for TransferReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}: {} new, {} changed, {} removed, {} sent, {} received in {}",
            self.direction,
            self.new_files,
            self.changed_files,
            self.removed_files,
            format_bytes(self.bytes_sent),
            format_bytes(self.bytes_received),
            format_duration(self.duration.as_secs()),
        )
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
