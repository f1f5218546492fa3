//! Data model shared by the Walker, Reconciliation Engine, and Copy
//! Planner (spec.md §3).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Directory,
    RegularFile,
    Symlink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathEntry {
    pub kind: EntryKind,
    pub size: u64,
    /// Seconds since epoch; fractional part discarded.
    pub mtime: i64,
}

/// `relative_path -> PathEntry`, keyed with forward slashes. A `BTreeMap`
/// keeps iteration in lexicographic path order, which is exactly the
/// order the DiffList (spec.md §3) and the deletion pass (spec.md §4.5)
/// require.
pub type EntryMap = BTreeMap<String, PathEntry>;
