//! Synkrotron: synchronize a local directory tree with a remote tree,
//! optionally reachable over SSH and optionally encrypted at file-name and
//! file-content granularity. See `SPEC_FULL.md` for the full design.

mod cli;
mod codec;
mod config;
mod copyplan;
mod diff;
mod entry;
mod error;
mod exec;
mod pattern;
mod remote;
mod remote_proto;
mod stats;
mod walker;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rayon::join;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cli::Command;
use config::{Config, RemoteConfig};
use copyplan::{ApplyOptions, Direction};
use diff::{DiffList, DiffOptions, HashSource};
use entry::EntryMap;
use error::{ConfigError, Result};
use pattern::Pattern;
use remote::Remote;
use stats::DiffStatistics;
use walker::{walk, FollowPolicy, WalkOptions};

fn main() {
    init_tracing();
    if let Err(e) = run() {
        println!("error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<()> {
    let args = cli::parse_args()?;

    if args.command == Command::Init {
        Config::init_remote(&args.remote, None)?;
        return Ok(());
    }

    let config = Config::load(None)?;
    let remote_config = config
        .remotes
        .get(&args.remote)
        .cloned()
        .ok_or_else(|| ConfigError::UnknownRemote(args.remote.clone()))?;

    let mut remote = Remote::new(
        args.remote.clone(),
        remote_config.location.clone(),
        config.sync_dir.clone(),
        remote_config.key.clone(),
        remote_config.mount_point.clone(),
    )?;

    if args.command == Command::Umount {
        remote.umount()?;
        return Ok(());
    }

    remote.mount()?;
    if args.command == Command::Mount {
        return Ok(());
    }

    let content = args.content || remote_config.content;
    let delete = args.delete || remote_config.delete;
    let ignore_time = args.ignore_time || remote_config.ignore_time;
    let modify_window = remote_config.modify_window;
    let follow_policy = if remote_config.preserve_links {
        FollowPolicy::PreserveSymlinks
    } else {
        FollowPolicy::FollowSymlinks
    };

    let rel_path = resolve_rel_path(&config.rel_cwd, args.path.as_deref());

    let include_patterns = compile_patterns(&remote_config.include);
    let exclude_patterns = compile_remote_excludes(&remote_config);
    let exclude_local_patterns = compile_local_excludes(&remote_config);

    let reverse_mounted = content && !remote_config.key.is_empty();
    if reverse_mounted {
        remote.reverse_mount()?;
    }

    let mut diff_stats: Option<DiffStatistics> = None;

    let pass = run_pass(
        &config.root,
        &rel_path,
        &mut remote,
        &rel_path,
        &exclude_local_patterns,
        &exclude_patterns,
        &include_patterns,
        follow_policy,
        &DiffOptions {
            ignore_time,
            content,
            modify_window,
        },
        reverse_mounted,
    )?;
    let follow_symlinks = follow_policy == FollowPolicy::FollowSymlinks;
    execute_command(&args, &pass, delete, follow_symlinks, &mut diff_stats)?;

    if reverse_mounted {
        remote.reverse_umount()?;
    }

    if !remote_config.key.is_empty() && !remote_config.clear.is_empty() {
        run_clear_passes(
            &args,
            &config.root,
            &remote_config,
            &remote,
            &rel_path,
            &exclude_patterns,
            &include_patterns,
            follow_policy,
            &DiffOptions {
                ignore_time,
                content,
                modify_window,
            },
            delete,
            follow_symlinks,
            &mut diff_stats,
        )?;
    }

    if args.command == Command::Diff {
        if let Some(stats) = diff_stats {
            stats.show();
        }
    }

    if args.umount {
        remote.umount()?;
    }
    remote.save_cache()?;
    Ok(())
}

/// Result of one local/remote comparison pass: the classified diff plus the
/// local and remote filesystem roots the Copy Planner should act against.
struct DiffPass {
    list: DiffList,
    local_root: PathBuf,
    remote_root: PathBuf,
}

#[allow(clippy::too_many_arguments)]
fn run_pass(
    local_tree_root: &Path,
    local_rel_path: &str,
    remote: &mut Remote,
    remote_rel_path: &str,
    local_excludes: &[Pattern],
    remote_excludes: &[Pattern],
    includes: &[Pattern],
    follow_policy: FollowPolicy,
    diff_opts: &DiffOptions,
    reverse_mounted: bool,
) -> Result<DiffPass> {
    let local_opts = WalkOptions {
        follow_policy,
        excludes: local_excludes,
        includes,
    };

    let (local_map, remote_result) = join(
        || walk(local_tree_root, local_rel_path, &local_opts),
        || collect_remote_map(remote, remote_rel_path, remote_excludes, includes, follow_policy),
    );
    let (remote_map, remote_hash_info) = remote_result?;

    let local_root = local_tree_root.join(local_rel_path);
    let remote_root = remote
        .mount_path()
        .expect("remote mounted before diffing")
        .join(remote_rel_path);

    let list = compute_diff(
        &local_map,
        &remote_map,
        diff_opts,
        local_tree_root,
        local_rel_path,
        remote,
        reverse_mounted,
        &remote_hash_info,
    )?;

    Ok(DiffPass {
        list,
        local_root,
        remote_root,
    })
}

/// Lookup built while decrypting a remote listing: decrypted relative path
/// -> the raw (still-encrypted) relative path under the encrypted remote
/// root, used to read a remote file's encrypted bytes directly without a
/// second remote round-trip.
#[derive(Default)]
struct RemoteHashInfo {
    encrypted_rel_path: String,
    raw_key_of: HashMap<String, String>,
}

fn collect_remote_map(
    remote: &mut Remote,
    rel_path: &str,
    excludes: &[Pattern],
    includes: &[Pattern],
    follow_policy: FollowPolicy,
) -> Result<(EntryMap, Option<RemoteHashInfo>)> {
    if remote.key.is_empty() {
        let mount = remote.mount_path().expect("mounted").to_path_buf();
        let opts = WalkOptions {
            follow_policy,
            excludes,
            includes,
        };
        return Ok((walk(&mount, rel_path, &opts), None));
    }

    // Wildcards cannot be translated across the encryption boundary
    // (spec.md §4.3): only fixed (wildcard-free) patterns are sent through
    // the Name Codec ahead of the fetch.
    let fixed_excludes: Vec<&Pattern> = excludes.iter().filter(|p| !p.has_wildcard()).collect();
    let fixed_includes: Vec<&Pattern> = includes.iter().filter(|p| !p.has_wildcard()).collect();

    let mut bodies: Vec<String> = fixed_excludes.iter().map(|p| pattern_body(p)).collect();
    bodies.extend(fixed_includes.iter().map(|p| pattern_body(p)));
    let encrypt_rel_path = rel_path != ".";
    if encrypt_rel_path {
        bodies.push(rel_path.to_string());
    }

    let encrypted_bodies = {
        let mut codec = remote.codec()?;
        codec.encrypt(&bodies)?
    };

    let n_excl = fixed_excludes.len();
    let n_incl = fixed_includes.len();
    let mut encrypted_excludes: Vec<Pattern> = fixed_excludes
        .iter()
        .zip(encrypted_bodies[..n_excl].iter())
        .filter_map(|(orig, enc)| Pattern::new(&reattach_anchor(orig, enc)))
        .collect();
    let encrypted_includes: Vec<Pattern> = fixed_includes
        .iter()
        .zip(encrypted_bodies[n_excl..n_excl + n_incl].iter())
        .filter_map(|(orig, enc)| Pattern::new(&reattach_anchor(orig, enc)))
        .collect();
    let encrypted_rel_path = if encrypt_rel_path {
        encrypted_bodies[n_excl + n_incl].clone()
    } else {
        ".".to_string()
    };

    // Forced excludes for the tool's own reserved remote paths.
    encrypted_excludes.push(Pattern::new("/.encfs6.xml").expect("static pattern is valid"));
    encrypted_excludes.push(Pattern::new("/clear").expect("static pattern is valid"));

    let encfs_source = remote
        .encfs_source()
        .expect("encfs_source set once key is non-empty and mounted")
        .to_path_buf();
    let raw_opts = WalkOptions {
        follow_policy,
        excludes: &encrypted_excludes,
        includes: &encrypted_includes,
    };
    let raw_map = walk(&encfs_source, &encrypted_rel_path, &raw_opts);

    let raw_keys: Vec<String> = raw_map.keys().cloned().collect();
    let decrypted_keys = {
        let mut codec = remote.codec()?;
        codec.decrypt(&raw_keys)?
    };

    let mut raw_key_of = HashMap::with_capacity(raw_keys.len());
    let mut entries = Vec::with_capacity(raw_keys.len());
    for (raw_key, decrypted_key) in raw_keys.into_iter().zip(decrypted_keys.into_iter()) {
        let stat = *raw_map.get(&raw_key).expect("key came from raw_map");
        raw_key_of.insert(decrypted_key.clone(), raw_key);
        entries.push((decrypted_key, stat));
    }

    let refiltered = walker::refilter_decrypted(entries, excludes, includes);
    Ok((
        refiltered,
        Some(RemoteHashInfo {
            encrypted_rel_path,
            raw_key_of,
        }),
    ))
}

fn pattern_body(p: &Pattern) -> String {
    if p.anchored() {
        p.raw().trim_start_matches('/').to_string()
    } else {
        p.raw().to_string()
    }
}

fn reattach_anchor(original: &Pattern, encrypted_body: &str) -> String {
    if original.anchored() {
        format!("/{encrypted_body}")
    } else {
        encrypted_body.to_string()
    }
}

#[allow(clippy::too_many_arguments)]
fn compute_diff(
    local_map: &EntryMap,
    remote_map: &EntryMap,
    opts: &DiffOptions,
    local_tree_root: &Path,
    local_rel_path: &str,
    remote: &mut Remote,
    reverse_mounted: bool,
    remote_hash_info: &Option<RemoteHashInfo>,
) -> Result<DiffList> {
    let local_base = local_tree_root.join(local_rel_path);
    let reverse_mount_path = remote.reverse_mount_path().map(|p| p.to_path_buf());
    let remote_mount_path = remote.mount_path().map(|p| p.to_path_buf());
    let encfs_source = remote.encfs_source().map(|p| p.to_path_buf());

    let local_hash_source = |path: &str| -> HashSource {
        if reverse_mounted {
            let full_rel = full_relative_path(local_rel_path, path);
            let encrypted = remote
                .codec()
                .and_then(|mut codec| codec.encrypt(&[full_rel]))
                .map(|v| v[0].clone())
                .unwrap_or_default();
            HashSource::ReverseMounted(
                reverse_mount_path.clone().expect("reverse-mounted when content+key"),
                encrypted,
            )
        } else {
            HashSource::Plain(local_base.join(path))
        }
    };

    let remote_hash_source = |path: &str| -> HashSource {
        match remote_hash_info {
            Some(info) => {
                let raw_key = info.raw_key_of.get(path).cloned().unwrap_or_else(|| path.to_string());
                HashSource::Plain(
                    encfs_source
                        .clone()
                        .expect("encfs_source set for encrypted remotes")
                        .join(&info.encrypted_rel_path)
                        .join(raw_key),
                )
            }
            None => HashSource::Plain(
                remote_mount_path
                    .clone()
                    .expect("mounted before diffing")
                    .join(local_rel_path)
                    .join(path),
            ),
        }
    };

    diff::diff(local_map, remote_map, opts, local_hash_source, remote_hash_source)
}

fn full_relative_path(rel_path: &str, path: &str) -> String {
    if path == "." {
        rel_path.to_string()
    } else if rel_path == "." {
        path.to_string()
    } else {
        format!("{rel_path}/{path}")
    }
}

fn execute_command(
    args: &cli::Cli,
    pass: &DiffPass,
    delete: bool,
    follow_symlinks: bool,
    diff_stats: &mut Option<DiffStatistics>,
) -> Result<()> {
    if args.command == Command::Diff || args.verbose {
        show_diff(&pass.list, args.verbose);
    }
    match args.command {
        Command::Diff => {
            let pass_stats = DiffStatistics::from_list(&pass.list);
            *diff_stats = Some(match diff_stats.take() {
                Some(existing) => existing.merge(pass_stats),
                None => pass_stats,
            });
        }
        Command::Pull => {
            let opts = ApplyOptions {
                direction: Direction::Pull,
                simulate: args.simulate,
                delete,
                follow_symlinks,
                delta: None,
            };
            copyplan::apply(&pass.list, &pass.remote_root, &pass.local_root, &opts)?;
        }
        Command::Push => {
            let opts = ApplyOptions {
                direction: Direction::Push,
                simulate: args.simulate,
                delete,
                follow_symlinks,
                delta: args.delta.as_deref(),
            };
            copyplan::apply(&pass.list, &pass.local_root, &pass.remote_root, &opts)?;
        }
        Command::Init | Command::Mount | Command::Umount => unreachable!("handled earlier"),
    }
    Ok(())
}

fn show_diff(list: &DiffList, verbose: bool) {
    for item in list {
        let suffix = if verbose {
            format!(" [{}]", item.rationale)
        } else {
            String::new()
        };
        match (&item.operation, &item.witness) {
            (diff::Operation::Push, diff::Witness::One(entry)) => {
                if entry.kind == entry::EntryKind::RegularFile {
                    println!("--> {} ({}){}", item.path, stats::format_size(entry.size), suffix);
                } else {
                    println!("--> {}{}", item.path, suffix);
                }
            }
            (diff::Operation::Pull, diff::Witness::One(entry)) => {
                if entry.kind == entry::EntryKind::RegularFile {
                    println!("<-- {} ({}){}", item.path, stats::format_size(entry.size), suffix);
                } else {
                    println!("<-- {}{}", item.path, suffix);
                }
            }
            (_, diff::Witness::Pair(local, remote)) => {
                println!(
                    "<-> {} ({}/{}){}",
                    item.path,
                    stats::format_size(local.size),
                    stats::format_size(remote.size),
                    suffix
                );
            }
            _ => {}
        }
    }
}

/// Merge the CLI `--path` argument with `rel_cwd` per spec.md §6 ("restrict
/// synchronization to rel_path"), normalizing `..`/`.`/empty components and
/// warning about (then dropping) a leading `/`.
fn resolve_rel_path(rel_cwd: &str, path: Option<&str>) -> String {
    let combined = match path {
        None => rel_cwd.to_string(),
        Some(p) => {
            let stripped = match p.strip_prefix('/') {
                Some(rest) => {
                    println!("warning: removing leading \"/\" from path argument");
                    rest
                }
                None => p,
            };
            if rel_cwd == "." {
                stripped.to_string()
            } else {
                format!("{rel_cwd}/{stripped}")
            }
        }
    };
    normalize_rel_path(&combined)
}

/// Normalizes `.`/`..`/empty components the way `os.path.normpath` does: a
/// `..` that has a real component to cancel removes it, but a `..` with
/// nothing resolvable behind it (stack empty, or the stack's last entry is
/// itself an unresolved `..`) is kept as a literal leading `../` segment
/// rather than silently discarded. Callers (e.g. `run_clear_passes`'s
/// `ClearOutsideRoot` check) rely on an escaping path surfacing as a
/// leading `..` in the result.
fn normalize_rel_path(raw: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    for component in raw.split('/') {
        match component {
            "" | "." => continue,
            ".." => match stack.last() {
                Some(&"..") | None => stack.push(".."),
                Some(_) => {
                    stack.pop();
                }
            },
            c => stack.push(c),
        }
    }
    if stack.is_empty() {
        ".".to_string()
    } else {
        stack.join("/")
    }
}

fn compile_patterns(raw: &[String]) -> Vec<Pattern> {
    raw.iter().filter_map(|s| Pattern::new(s)).collect()
}

/// Every walked tree, local or remote, forcibly excludes the tool's own
/// `.synkrotron` state directory (original: `Repo.__init__` unconditionally
/// appends `/.synkrotron` to every exclude list).
const FORCED_EXCLUDE: &str = "/.synkrotron";

/// Local excludes additionally carry the `clear` paths (anchored) when the
/// remote is encrypted, so clear-path files are skipped during the main
/// encrypted-tree pass and only handled by the dedicated clear-paths pass
/// (spec.md §4.3 "Clear-paths exception").
fn compile_local_excludes(remote_config: &RemoteConfig) -> Vec<Pattern> {
    let mut raw = remote_config.exclude.clone();
    if !remote_config.key.is_empty() {
        for clear in &remote_config.clear {
            raw.push(format!("/{clear}"));
        }
    }
    raw.push(FORCED_EXCLUDE.to_string());
    compile_patterns(&raw)
}

fn compile_remote_excludes(remote_config: &RemoteConfig) -> Vec<Pattern> {
    let mut raw = remote_config.exclude.clone();
    raw.push(FORCED_EXCLUDE.to_string());
    compile_patterns(&raw)
}

#[allow(clippy::too_many_arguments)]
fn run_clear_passes(
    args: &cli::Cli,
    local_tree_root: &Path,
    remote_config: &RemoteConfig,
    remote: &Remote,
    rel_path: &str,
    excludes: &[Pattern],
    includes: &[Pattern],
    follow_policy: FollowPolicy,
    diff_opts: &DiffOptions,
    delete: bool,
    follow_symlinks: bool,
    diff_stats: &mut Option<DiffStatistics>,
) -> Result<()> {
    let clear_root = remote
        .encfs_source()
        .expect("encfs_source set for encrypted remotes with clear paths")
        .join("clear");
    if !clear_root.exists() {
        std::fs::create_dir_all(&clear_root)?;
    }

    for clear_path in &remote_config.clear {
        let clear_path = normalize_rel_path(clear_path.trim_start_matches('/'));
        if clear_path.starts_with("..") {
            return Err(ConfigError::ClearOutsideRoot(clear_path).into());
        }
        let rel_clear_path = if rel_path != "." && !clear_path.starts_with(rel_path) {
            if rel_path.starts_with(&clear_path) {
                rel_path.to_string()
            } else {
                continue; // rel_path is outside of this clear_path
            }
        } else {
            clear_path.clone()
        };

        if args.verbose {
            info!(path = %clear_path, "processing unencrypted files");
            println!("processing unencrypted files at \"{clear_path}\"");
        }

        let local_opts = WalkOptions {
            follow_policy,
            excludes,
            includes,
        };
        let local_map = walk(local_tree_root, &rel_clear_path, &local_opts);
        let remote_opts = WalkOptions {
            follow_policy,
            excludes,
            includes,
        };
        let remote_map = walk(&clear_root, &rel_clear_path, &remote_opts);

        let list = diff::diff(
            &local_map,
            &remote_map,
            diff_opts,
            |path: &str| HashSource::Plain(local_tree_root.join(&rel_clear_path).join(path)),
            |path: &str| HashSource::Plain(clear_root.join(&rel_clear_path).join(path)),
        )?;

        let pass = DiffPass {
            list,
            local_root: local_tree_root.join(&rel_clear_path),
            remote_root: clear_root.join(&rel_clear_path),
        };
        execute_command(args, &pass, delete, follow_symlinks, diff_stats)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_rel_path_joins_and_normalizes() {
        assert_eq!(resolve_rel_path(".", None), ".");
        assert_eq!(resolve_rel_path(".", Some("a/./b")), "a/b");
        assert_eq!(resolve_rel_path("sub", Some("../x")), "x");
    }

    #[test]
    fn resolve_rel_path_strips_leading_slash() {
        assert_eq!(resolve_rel_path(".", Some("/abs/path")), "abs/path");
    }

    #[test]
    fn normalize_rel_path_keeps_unresolvable_leading_dotdot() {
        assert_eq!(normalize_rel_path("../outside"), "../outside");
        assert_eq!(normalize_rel_path("../../deep"), "../../deep");
        assert_eq!(normalize_rel_path("a/../../outside"), "../outside");
    }

    #[test]
    fn pattern_body_strips_anchor_for_translation() {
        let anchored = Pattern::new("/foo/bar").unwrap();
        assert_eq!(pattern_body(&anchored), "foo/bar");
        let unanchored = Pattern::new("foo").unwrap();
        assert_eq!(pattern_body(&unanchored), "foo");
    }
}
