//! Cumulative diff statistics shown by the `diff` command (SPEC_FULL.md
//! §4.4, restored from `original_source`'s `DiffStatistics`).

use crate::diff::{DiffList, Operation, Witness};
use crate::entry::EntryKind;

#[derive(Debug, Default, Clone, Copy)]
pub struct DiffStatistics {
    pub pull_count: u64,
    pub pull_size: u64,
    pub push_count: u64,
    pub push_size: u64,
    pub rest_count: u64,
    pub rest_size_local: u64,
    pub rest_size_remote: u64,
}

impl DiffStatistics {
    pub fn from_list(list: &DiffList) -> Self {
        let mut stats = DiffStatistics::default();
        for item in list {
            match (item.operation, &item.witness) {
                (Operation::Push, Witness::One(entry)) => {
                    if entry.kind == EntryKind::RegularFile {
                        stats.push_size += entry.size;
                    }
                    stats.push_count += 1;
                }
                (Operation::Pull, Witness::One(entry)) => {
                    if entry.kind == EntryKind::RegularFile {
                        stats.pull_size += entry.size;
                    }
                    stats.pull_count += 1;
                }
                (_, Witness::Pair(local, remote)) => {
                    if local.kind == EntryKind::RegularFile {
                        stats.rest_size_local += local.size;
                    }
                    if remote.kind == EntryKind::RegularFile {
                        stats.rest_size_remote += remote.size;
                    }
                    stats.rest_count += 1;
                }
                _ => {}
            }
        }
        stats
    }

    pub fn merge(mut self, other: DiffStatistics) -> DiffStatistics {
        self.pull_count += other.pull_count;
        self.pull_size += other.pull_size;
        self.push_count += other.push_count;
        self.push_size += other.push_size;
        self.rest_count += other.rest_count;
        self.rest_size_local += other.rest_size_local;
        self.rest_size_remote += other.rest_size_remote;
        self
    }

    pub fn show(&self) {
        if self.pull_count > 0 {
            println!("pull: {} files ({})", self.pull_count, format_size(self.pull_size));
        }
        if self.push_count > 0 {
            println!("push: {} files ({})", self.push_count, format_size(self.push_size));
        }
        if self.rest_count > 0 {
            println!(
                "rest: {} files (local: {}, remote: {})",
                self.rest_count,
                format_size(self.rest_size_local),
                format_size(self.rest_size_remote)
            );
        }
    }
}

/// Human-readable byte size, matching `original_source`'s
/// `Diff._format_size`: divide by 1024 until under 1000, trailing unit
/// from `T/G/M/K/<empty>`.
pub fn format_size(byte_size: u64) -> String {
    let units = ["T", "G", "M", "K", ""];
    let mut size = byte_size as f64;
    let mut idx = units.len() - 1;
    while idx > 0 && size >= 1000.0 {
        size /= 1024.0;
        idx -= 1;
    }
    format!("{:.1} {}B", size, units[idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_sizes_have_no_unit_prefix() {
        assert_eq!(format_size(512), "512.0 B");
    }

    #[test]
    fn large_sizes_pick_appropriate_unit() {
        assert_eq!(format_size(2_000_000), "1.9 MB");
    }
}
