//! Reconciliation Engine (spec.md §4.4 / SPEC_FULL.md §4.4).

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use rayon::join;

use crate::entry::{EntryKind, EntryMap, PathEntry};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Push,
    Pull,
    Content,
    Type,
    Size,
}

#[derive(Debug, Clone, Copy)]
pub enum Witness {
    One(PathEntry),
    Pair(PathEntry, PathEntry),
}

#[derive(Debug, Clone)]
pub struct DiffItem {
    pub path: String,
    pub witness: Witness,
    pub operation: Operation,
    pub rationale: String,
}

pub type DiffList = Vec<DiffItem>;

/// Where to find the bytes of a file for content hashing — plain local
/// path, or the encrypted view of a local file through an EncFS reverse
/// mount (spec.md §4.4 "Content hashing under encryption").
pub enum HashSource {
    Plain(PathBuf),
    /// `(reverse_mount_root, encrypted_relative_path)`
    ReverseMounted(PathBuf, String),
}

pub struct DiffOptions {
    pub ignore_time: bool,
    pub content: bool,
    pub modify_window: i64,
}

/// Classify every path in `local` and `remote` per spec.md §4.4, producing
/// a `DiffList` sorted lexicographically by path. `hash_source` resolves
/// how to read a given relative path's bytes for each side when content
/// hashing is enabled.
pub fn diff(
    local: &EntryMap,
    remote: &EntryMap,
    opts: &DiffOptions,
    mut local_hash_source: impl FnMut(&str) -> HashSource,
    mut remote_hash_source: impl FnMut(&str) -> HashSource,
) -> Result<DiffList> {
    let mut list = DiffList::new();

    for (path, local_entry) in local.iter() {
        match remote.get(path) {
            None => list.push(DiffItem {
                path: path.clone(),
                witness: Witness::One(*local_entry),
                operation: Operation::Push,
                rationale: "remote file does not exist".to_string(),
            }),
            Some(remote_entry) => {
                if let Some(item) = compare(
                    path,
                    local_entry,
                    remote_entry,
                    opts,
                    &mut local_hash_source,
                    &mut remote_hash_source,
                )? {
                    list.push(item);
                }
            }
        }
    }

    for (path, remote_entry) in remote.iter() {
        if !local.contains_key(path) {
            list.push(DiffItem {
                path: path.clone(),
                witness: Witness::One(*remote_entry),
                operation: Operation::Pull,
                rationale: "local file does not exist".to_string(),
            });
        }
    }

    list.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(list)
}

#[allow(clippy::too_many_arguments)]
fn compare(
    path: &str,
    local_entry: &PathEntry,
    remote_entry: &PathEntry,
    opts: &DiffOptions,
    local_hash_source: &mut impl FnMut(&str) -> HashSource,
    remote_hash_source: &mut impl FnMut(&str) -> HashSource,
) -> Result<Option<DiffItem>> {
    if local_entry.kind == EntryKind::Directory && remote_entry.kind == EntryKind::Directory {
        return Ok(None);
    }

    let mut delta_t = local_entry.mtime - remote_entry.mtime;
    if delta_t.abs() <= opts.modify_window {
        delta_t = 0;
    }
    let time_verdict = match delta_t.cmp(&0) {
        std::cmp::Ordering::Greater => Some((Operation::Push, "local file is newer")),
        std::cmp::Ordering::Less => Some((Operation::Pull, "remote file is newer")),
        std::cmp::Ordering::Equal => None,
    };

    if !opts.ignore_time {
        if let Some((op, reason)) = time_verdict {
            return Ok(Some(DiffItem {
                path: path.to_string(),
                witness: Witness::Pair(*local_entry, *remote_entry),
                operation: op,
                rationale: reason.to_string(),
            }));
        }
    }

    // Past this point the timestamp alone does not decide a direction
    // (either `ignore_time` is set, or both sides agree within the modify
    // window). A type/size/content mismatch still has no preferred
    // direction of its own, so when a time skew exists under
    // `ignore_time` it still picks the transfer direction; only the
    // rationale changes.
    if local_entry.kind != remote_entry.kind {
        let operation = time_verdict.map(|(op, _)| op).unwrap_or(Operation::Type);
        return Ok(Some(DiffItem {
            path: path.to_string(),
            witness: Witness::Pair(*local_entry, *remote_entry),
            operation,
            rationale: format!(
                "files have different types (local: {:?}, remote: {:?})",
                local_entry.kind, remote_entry.kind
            ),
        }));
    }

    if local_entry.size != remote_entry.size {
        let operation = time_verdict.map(|(op, _)| op).unwrap_or(Operation::Size);
        return Ok(Some(DiffItem {
            path: path.to_string(),
            witness: Witness::Pair(*local_entry, *remote_entry),
            operation,
            rationale: format!(
                "files have different sizes (local: {}, remote: {})",
                local_entry.size, remote_entry.size
            ),
        }));
    }

    if opts.content && local_entry.kind == EntryKind::RegularFile {
        let local_src = local_hash_source(path);
        let remote_src = remote_hash_source(path);
        let (local_hash, remote_hash) = join(
            || hash_source(&local_src),
            || hash_source(&remote_src),
        );
        let local_hash = local_hash?;
        let remote_hash = remote_hash?;
        if local_hash != remote_hash {
            let operation = time_verdict.map(|(op, _)| op).unwrap_or(Operation::Content);
            return Ok(Some(DiffItem {
                path: path.to_string(),
                witness: Witness::Pair(*local_entry, *remote_entry),
                operation,
                rationale: format!(
                    "files have different content (local hash {local_hash}, remote hash {remote_hash})"
                ),
            }));
        }
    }

    Ok(None)
}

fn hash_source(source: &HashSource) -> Result<String> {
    let path: PathBuf = match source {
        HashSource::Plain(p) => p.clone(),
        HashSource::ReverseMounted(root, enc_rel) => root.join(enc_rel),
    };
    hash_file(&path)
}

fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(size: u64, mtime: i64) -> PathEntry {
        PathEntry {
            kind: EntryKind::RegularFile,
            size,
            mtime,
        }
    }
    fn dir() -> PathEntry {
        PathEntry {
            kind: EntryKind::Directory,
            size: 0,
            mtime: 0,
        }
    }

    fn default_opts() -> DiffOptions {
        DiffOptions {
            ignore_time: false,
            content: false,
            modify_window: 0,
        }
    }

    fn no_hash(_: &str) -> HashSource {
        unreachable!("content hashing disabled in this test")
    }

    #[test]
    fn identical_trees_produce_empty_diff() {
        let mut a = EntryMap::new();
        a.insert(".".into(), dir());
        a.insert("file".into(), file(10, 100));
        let b = a.clone();
        let list = diff(&a, &b, &default_opts(), no_hash, no_hash).unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn push_and_pull_are_swapped_under_permutation() {
        let mut local = EntryMap::new();
        local.insert("only_local".into(), file(1, 1));
        let mut remote = EntryMap::new();
        remote.insert("only_remote".into(), file(1, 1));

        let forward = diff(&local, &remote, &default_opts(), no_hash, no_hash).unwrap();
        let backward = diff(&remote, &local, &default_opts(), no_hash, no_hash).unwrap();

        assert_eq!(forward.len(), 2);
        assert_eq!(backward.len(), 2);
        let fwd_push = forward.iter().find(|d| d.path == "only_local").unwrap();
        assert_eq!(fwd_push.operation, Operation::Push);
        let bwd_pull = backward.iter().find(|d| d.path == "only_local").unwrap();
        assert_eq!(bwd_pull.operation, Operation::Pull);
    }

    #[test]
    fn modify_window_absorbs_small_time_skew() {
        let mut local = EntryMap::new();
        local.insert("file".into(), file(7, 103));
        let mut remote = EntryMap::new();
        remote.insert("file".into(), file(7, 100));

        let strict = DiffOptions {
            ignore_time: false,
            content: false,
            modify_window: 0,
        };
        let windowed = DiffOptions {
            ignore_time: false,
            content: false,
            modify_window: 5,
        };
        assert_eq!(diff(&local, &remote, &strict, no_hash, no_hash).unwrap().len(), 1);
        assert!(diff(&local, &remote, &windowed, no_hash, no_hash).unwrap().is_empty());
    }

    #[test]
    fn both_directories_are_omitted() {
        let mut local = EntryMap::new();
        local.insert("dir".into(), dir());
        let mut remote = EntryMap::new();
        remote.insert("dir".into(), dir());
        assert!(diff(&local, &remote, &default_opts(), no_hash, no_hash).unwrap().is_empty());
    }

    #[test]
    fn content_hash_catches_byte_difference_at_equal_size_and_time() {
        let dir = tempfile::tempdir().unwrap();
        let lf = dir.path().join("local_file");
        let rf = dir.path().join("remote_file");
        std::fs::write(&lf, b"aaaaaaa").unwrap();
        std::fs::write(&rf, b"bbbbbbb").unwrap();

        let mut local = EntryMap::new();
        local.insert("file".into(), file(7, 100));
        let mut remote = EntryMap::new();
        remote.insert("file".into(), file(7, 100));

        let opts_no_content = DiffOptions {
            ignore_time: false,
            content: false,
            modify_window: 0,
        };
        assert!(diff(&local, &remote, &opts_no_content, no_hash, no_hash)
            .unwrap()
            .is_empty());

        let opts_content = DiffOptions {
            ignore_time: false,
            content: true,
            modify_window: 0,
        };
        let list = diff(
            &local,
            &remote,
            &opts_content,
            |_| HashSource::Plain(lf.clone()),
            |_| HashSource::Plain(rf.clone()),
        )
        .unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].operation, Operation::Content);
    }
}
