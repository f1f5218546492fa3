//! Copy Planner (spec.md §4.5 / SPEC_FULL.md §4.5): turns a classified
//! `DiffList` into a deletion pass plus a single `rsync` invocation.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::info;

use crate::diff::{DiffList, Operation};
use crate::error::Result;
use crate::exec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Push,
    Pull,
}

impl Direction {
    fn opposite_operation(self) -> Operation {
        match self {
            Direction::Push => Operation::Pull,
            Direction::Pull => Operation::Push,
        }
    }
}

pub struct ApplyOptions<'a> {
    pub direction: Direction,
    pub simulate: bool,
    pub delete: bool,
    pub follow_symlinks: bool,
    /// Overrides the destination with a local delta directory (spec.md
    /// §4.5 "Delta-push").
    pub delta: Option<&'a Path>,
}

/// Materialize `diff_list` by deleting destination-only entries (when
/// requested) and handing the remaining file list to `rsync`. `src`/`dst`
/// are the roots of the two trees as already resolved by the caller (the
/// local root and the mounted remote root).
pub fn apply(diff_list: &DiffList, src: &Path, dst: &Path, opts: &ApplyOptions) -> Result<()> {
    let rev_op = opts.direction.opposite_operation();

    if opts.delete {
        // Children before parents: walk the list in reverse sorted order.
        for item in diff_list.iter().rev() {
            if item.operation == rev_op {
                info!(path = %item.path, "deleting");
                println!("deleting {}", item.path);
                if !opts.simulate {
                    remove_path(&dst.join(&item.path))?;
                }
            }
        }
    }

    for item in diff_list.iter() {
        if item.operation == Operation::Content {
            println!("deleting {} (different content)", item.path);
            if !opts.simulate {
                let target = dst.join(&item.path);
                if target.is_file() || target.is_symlink() {
                    fs::remove_file(&target)?;
                }
            }
        }
    }

    let file_list: Vec<&str> = diff_list
        .iter()
        .filter(|item| item.operation != rev_op)
        .map(|item| item.path.as_str())
        .collect();
    if file_list.is_empty() {
        return Ok(());
    }
    let stdin = file_list.join("\n");

    if !exec::require_tool("rsync") {
        return Err(crate::error::MountError::ToolMissing("rsync").into());
    }

    let mut args: Vec<&str> = vec![
        "-ahuR",
        "--files-from=-",
        "--progress",
        "--partial-dir",
        ".rsync-partial",
    ];
    if opts.simulate {
        args.push("--dry-run");
    }
    if !opts.follow_symlinks {
        args.push("--copy-links");
    }
    let effective_dst = opts.delta.unwrap_or(dst);
    let dst_str = effective_dst.to_string_lossy().into_owned();
    args.push(".");
    args.push(dst_str.as_str());

    let output = exec::run(
        "rsync",
        &args,
        Some(src),
        Some(&stdin),
        false,
        &HashMap::new(),
    )?;
    if output.status != 0 {
        return Err(crate::error::ExternalHelperError {
            tool: "rsync",
            reason: format!("exit status {}", output.status),
        }
        .into());
    }
    Ok(())
}

fn remove_path(path: &Path) -> Result<()> {
    if path.is_dir() && !path.is_symlink() {
        // Reverse path order means children were already removed; if the
        // directory is still non-empty (an excluded file left inside it, a
        // concurrent include-pattern mismatch) `remove_dir` fails with
        // `ENOTEMPTY` and that propagates as a fatal error, same as the
        // original's unconditional `os.rmdir`.
        fs::remove_dir(path)?;
    } else if path.exists() || path.is_symlink() {
        fs::remove_file(path)?;
    }
    Ok(())
}
