//! Tree Walker (spec.md §4.3 / SPEC_FULL.md §4.3).

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::entry::{EntryKind, EntryMap, PathEntry};
use crate::pattern::Pattern;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowPolicy {
    FollowSymlinks,
    PreserveSymlinks,
}

/// Everything the Walker needs besides the root path and starting
/// relative path: symlink policy plus the compiled exclude/include lists.
pub struct WalkOptions<'a> {
    pub follow_policy: FollowPolicy,
    pub excludes: &'a [Pattern],
    pub includes: &'a [Pattern],
}

/// Walk `root/rel_path` and return its normalized `EntryMap` (spec.md
/// §4.3). Returns an empty map if the sub-path does not exist, or if the
/// root entry itself is excluded.
pub fn walk(root: &Path, rel_path: &str, opts: &WalkOptions) -> EntryMap {
    let mut map = EntryMap::new();
    let base = if rel_path == "." {
        root.to_path_buf()
    } else {
        root.join(rel_path)
    };
    let base_stat = match stat_entry(&base, opts.follow_policy) {
        Some(s) => s,
        None => return map,
    };

    if is_excluded(".", opts.excludes) {
        return map;
    }
    map.insert(".".to_string(), base_stat.1);
    if base_stat.0 != EntryKind::Directory {
        // A root that is itself a plain file is emitted and nothing else
        // is walked.
        return map;
    }

    let mut visited_dirs: HashSet<PathBuf> = HashSet::new();
    if opts.follow_policy == FollowPolicy::FollowSymlinks {
        if let Ok(canon) = base.canonicalize() {
            visited_dirs.insert(canon);
        }
    }
    let mut whitelist_dirs: HashSet<String> = HashSet::new();
    walk_dir(&base, ".", opts, &mut visited_dirs, &mut whitelist_dirs, &mut map);
    map
}

fn walk_dir(
    dir: &Path,
    rel_dir: &str,
    opts: &WalkOptions,
    visited_dirs: &mut HashSet<PathBuf>,
    whitelist_dirs: &mut HashSet<String>,
    map: &mut EntryMap,
) {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "unable to list directory, skipping");
            return;
        }
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    for name in names {
        let rel_path = if rel_dir == "." {
            name.clone()
        } else {
            format!("{rel_dir}/{name}")
        };
        if !is_admitted(&rel_path, opts, whitelist_dirs) {
            continue;
        }
        let child = dir.join(&name);
        let stat = match stat_entry(&child, opts.follow_policy) {
            Some(s) => s,
            None => {
                warn!(path = %rel_path, "unable to stat, skipping");
                continue;
            }
        };
        map.insert(rel_path.clone(), stat.1);
        if stat.0 == EntryKind::Directory {
            if opts.follow_policy == FollowPolicy::FollowSymlinks {
                match child.canonicalize() {
                    Ok(canon) if !visited_dirs.insert(canon) => {
                        // Cycle: this directory (by canonical path) was
                        // already visited through another link chain.
                        continue;
                    }
                    _ => {}
                }
            }
            walk_dir(&child, &rel_path, opts, visited_dirs, whitelist_dirs, map);
        }
    }
}

/// Stat a path according to the symlink policy: `preserve-symlinks` uses
/// `lstat`-equivalent metadata and never descends through links;
/// `follow-symlinks` uses `stat`-equivalent metadata and descends through
/// them.
fn stat_entry(path: &Path, policy: FollowPolicy) -> Option<(EntryKind, PathEntry)> {
    let meta = match policy {
        FollowPolicy::PreserveSymlinks => fs::symlink_metadata(path).ok()?,
        FollowPolicy::FollowSymlinks => fs::metadata(path).ok()?,
    };
    let kind = if policy == FollowPolicy::PreserveSymlinks && meta.file_type().is_symlink() {
        EntryKind::Symlink
    } else if meta.is_dir() {
        EntryKind::Directory
    } else if meta.is_file() {
        EntryKind::RegularFile
    } else {
        EntryKind::Symlink
    };
    let size = if kind == EntryKind::RegularFile { meta.len() } else { 0 };
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Some((kind, PathEntry { kind, size, mtime }))
}

fn is_excluded(path: &str, excludes: &[Pattern]) -> bool {
    excludes.iter().any(|p| p.matches(path))
}

/// Decide whether `path` should be admitted into the walk, applying
/// excludes, then includes (with directory whitelisting), per spec.md
/// §4.3 step 4.
fn is_admitted(path: &str, opts: &WalkOptions, whitelist_dirs: &mut HashSet<String>) -> bool {
    if path == "." {
        return true;
    }
    if is_excluded(path, opts.excludes) {
        return false;
    }
    if opts.includes.is_empty() {
        return true;
    }
    if whitelist_dirs.iter().any(|wl| path.starts_with(wl.as_str())) {
        return true;
    }
    let path_depth = path.matches('/').count();
    for pattern in opts.includes {
        let (matched, is_full) = pattern.matches_partial(path, path_depth);
        if matched {
            if is_full {
                whitelist_dirs.insert(format!("{path}/"));
            }
            return true;
        }
    }
    false
}

/// Re-apply the original (wildcard-inclusive) exclude/include patterns to
/// an already name-decrypted set of entries (spec.md §4.3 "Remote-encrypted
/// mode", step 4). Only fixed (non-wildcard) patterns can be translated
/// ahead of the fetch, so the fetch-side walk over-admits; this pass prunes
/// the result down to what the full pattern set actually allows.
///
/// Entries are visited top-down (shortest path first, which a lexicographic
/// sort already guarantees for prefix-related paths) so a rejected
/// directory's descendants are pruned via an accumulated excluded-prefix
/// set rather than re-evaluated one by one.
pub fn refilter_decrypted(
    mut entries: Vec<(String, PathEntry)>,
    excludes: &[Pattern],
    includes: &[Pattern],
) -> EntryMap {
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    let opts = WalkOptions {
        follow_policy: FollowPolicy::PreserveSymlinks,
        excludes,
        includes,
    };
    let mut map = EntryMap::new();
    let mut whitelist_dirs: HashSet<String> = HashSet::new();
    let mut excluded_prefixes: Vec<String> = Vec::new();
    for (path, entry) in entries {
        if path == "." {
            map.insert(path, entry);
            continue;
        }
        if excluded_prefixes.iter().any(|p| path.starts_with(p.as_str())) {
            continue;
        }
        if !is_admitted(&path, &opts, &mut whitelist_dirs) {
            excluded_prefixes.push(format!("{path}/"));
            continue;
        }
        map.insert(path, entry);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self as stdfs, File};
    use tempfile::tempdir;

    fn opts<'a>(excludes: &'a [Pattern], includes: &'a [Pattern]) -> WalkOptions<'a> {
        WalkOptions {
            follow_policy: FollowPolicy::PreserveSymlinks,
            excludes,
            includes,
        }
    }

    #[test]
    fn baseline_walk_lists_dirs_and_files_sorted() {
        let dir = tempdir().unwrap();
        stdfs::create_dir(dir.path().join("dir")).unwrap();
        File::create(dir.path().join("dir/file")).unwrap();
        File::create(dir.path().join("file")).unwrap();

        let map = walk(dir.path(), ".", &opts(&[], &[]));
        let mut keys: Vec<_> = map.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec![".", "dir", "dir/file", "file"]);
    }

    #[test]
    fn missing_subpath_returns_empty_map() {
        let dir = tempdir().unwrap();
        let map = walk(dir.path(), "nope", &opts(&[], &[]));
        assert!(map.is_empty());
    }

    #[test]
    fn anchored_vs_unanchored_exclude() {
        let dir = tempdir().unwrap();
        stdfs::create_dir(dir.path().join("dir")).unwrap();
        File::create(dir.path().join("dir/file")).unwrap();
        File::create(dir.path().join("file")).unwrap();

        let anchored = vec![Pattern::new("/file").unwrap()];
        let map = walk(dir.path(), ".", &opts(&anchored, &[]));
        assert!(!map.contains_key("file"));
        assert!(map.contains_key("dir/file"));

        let unanchored = vec![Pattern::new("file").unwrap()];
        let map2 = walk(dir.path(), ".", &opts(&unanchored, &[]));
        assert!(!map2.contains_key("file"));
        assert!(!map2.contains_key("dir/file"));
    }

    #[test]
    fn include_whitelists_directory_descendants() {
        let dir = tempdir().unwrap();
        stdfs::create_dir_all(dir.path().join("a/b")).unwrap();
        File::create(dir.path().join("a/b/c")).unwrap();
        stdfs::create_dir_all(dir.path().join("x")).unwrap();
        File::create(dir.path().join("x/y")).unwrap();

        let includes = vec![Pattern::new("a").unwrap()];
        let map = walk(dir.path(), ".", &opts(&[], &includes));
        assert!(map.contains_key("a"));
        assert!(map.contains_key("a/b"));
        assert!(map.contains_key("a/b/c"));
        assert!(!map.contains_key("x"));
        assert!(!map.contains_key("x/y"));
    }

    #[test]
    fn refilter_prunes_excluded_directory_descendants() {
        let entry = PathEntry {
            kind: EntryKind::RegularFile,
            size: 0,
            mtime: 0,
        };
        let dir_entry = PathEntry {
            kind: EntryKind::Directory,
            size: 0,
            mtime: 0,
        };
        let entries = vec![
            (".".to_string(), dir_entry),
            ("secret".to_string(), dir_entry),
            ("secret/file".to_string(), entry),
            ("keep".to_string(), entry),
        ];
        let excludes = vec![Pattern::new("secret").unwrap()];
        let map = refilter_decrypted(entries, &excludes, &[]);
        assert!(!map.contains_key("secret"));
        assert!(!map.contains_key("secret/file"));
        assert!(map.contains_key("keep"));
    }

    #[test]
    fn every_non_root_key_has_a_present_parent() {
        let dir = tempdir().unwrap();
        stdfs::create_dir_all(dir.path().join("a/b")).unwrap();
        File::create(dir.path().join("a/b/c")).unwrap();
        let map = walk(dir.path(), ".", &opts(&[], &[]));
        for key in map.keys() {
            if key == "." {
                continue;
            }
            let parent = match key.rfind('/') {
                Some(idx) => &key[..idx],
                None => ".",
            };
            assert!(map.contains_key(parent), "missing parent {parent} for {key}");
        }
    }
}
