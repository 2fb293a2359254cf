//! Manifest reconciliation.
//!
//! Classifies every path of a source and a target manifest as new, changed
//! or removed. Backup reconciles local (source) against remote (target);
//! restore swaps the arguments. Paths compare as exact, case-sensitive
//! strings.

use crate::manifest::{FileRecord, Manifest};
use std::collections::BTreeMap;

/// Disjoint path sets produced by [`reconcile`], each sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    /// In source, absent from target (source records)
    pub new: Vec<FileRecord>,
    /// In both, checksums differ (source records)
    pub changed: Vec<FileRecord>,
    /// In target, absent from source (target records)
    pub removed: Vec<FileRecord>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

pub fn reconcile(source: &Manifest, target: &Manifest) -> DiffResult {
    let target_map: BTreeMap<&str, &FileRecord> = target
        .files()
        .iter()
        .map(|f| (f.relative_path.as_str(), f))
        .collect();
    let source_map: BTreeMap<&str, &FileRecord> = source
        .files()
        .iter()
        .map(|f| (f.relative_path.as_str(), f))
        .collect();

    let mut result = DiffResult::default();

    for (path, record) in &source_map {
        match target_map.get(path) {
            None => result.new.push((*record).clone()),
            Some(other) if other.checksum != record.checksum => {
                result.changed.push((*record).clone())
            }
            Some(_) => {}
        }
    }

    result.removed = target_map
        .iter()
        .filter(|(path, _)| !source_map.contains_key(*path))
        .map(|(_, record)| (*record).clone())
        .collect();

    result
}
