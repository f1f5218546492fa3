//! Configuration file reader/writer (spec.md §6 / SPEC_FULL.md §6.1).
//!
//! Mirrors `Config` in `examples/original_source/src/synkrotron.py`: locate
//! `.synkrotron/config` by walking up from the working directory, parse one
//! INI section per remote, and support the `init` command's
//! create-or-append behavior.

use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use ini::Ini;

use crate::error::{ConfigError, Result};

const KNOWN_OPTIONS: &[&str] = &[
    "location",
    "key",
    "mount_point",
    "exclude",
    "include",
    "clear",
    "ignore_time",
    "modify_window",
    "content",
    "preserve_links",
    "delete",
];

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub location: String,
    pub key: String,
    pub mount_point: Option<PathBuf>,
    pub exclude: Vec<String>,
    pub include: Vec<String>,
    pub clear: Vec<String>,
    pub ignore_time: bool,
    pub modify_window: i64,
    pub content: bool,
    pub preserve_links: bool,
    pub delete: bool,
}

pub struct Config {
    pub root: PathBuf,
    pub sync_dir: PathBuf,
    /// Working directory relative to `root`, using forward slashes; `.` at
    /// the root itself.
    pub rel_cwd: String,
    pub remotes: HashMap<String, RemoteConfig>,
}

impl Config {
    /// Locate and parse the configuration, starting the search for
    /// `.synkrotron` at `cwd` (or the process working directory).
    pub fn load(cwd: Option<PathBuf>) -> Result<Self> {
        let (root, sync_dir, rel_cwd) = find_paths(cwd)?;
        let config_file = sync_dir.join("config");
        let ini = Ini::load_from_file(&config_file)
            .map_err(|e| ConfigError::Ini(e.to_string()))?;

        let mut remotes = HashMap::new();
        for (section, props) in ini.iter() {
            let Some(name) = section else { continue };
            for key in props.iter().map(|(k, _)| k) {
                if !KNOWN_OPTIONS.contains(&key) {
                    return Err(ConfigError::UnknownOption {
                        option: key.to_string(),
                        remote: name.to_string(),
                        supported: KNOWN_OPTIONS.join(","),
                    }
                    .into());
                }
            }
            let location = props.get("location").unwrap_or("").to_string();
            if location.is_empty() {
                return Err(ConfigError::MissingLocation(name.to_string()).into());
            }
            let mount_point = props
                .get("mount_point")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from);
            remotes.insert(
                name.to_string(),
                RemoteConfig {
                    location,
                    key: props.get("key").unwrap_or("").to_string(),
                    mount_point,
                    exclude: split_list(props.get("exclude").unwrap_or("")),
                    include: split_list(props.get("include").unwrap_or("")),
                    clear: split_list(props.get("clear").unwrap_or("")),
                    ignore_time: parse_bool(props.get("ignore_time").unwrap_or("0"))?,
                    modify_window: props
                        .get("modify_window")
                        .unwrap_or("0")
                        .parse()
                        .map_err(|_| ConfigError::Ini("modify_window must be an integer".into()))?,
                    content: parse_bool(props.get("content").unwrap_or("0"))?,
                    preserve_links: parse_bool(props.get("preserve_links").unwrap_or("0"))?,
                    delete: parse_bool(props.get("delete").unwrap_or("0"))?,
                },
            );
        }

        Ok(Config {
            root,
            sync_dir,
            rel_cwd,
            remotes,
        })
    }

    /// Write a minimal config for a delta directory (spec.md §4.5
    /// "Delta-push"; original: `Config.write_delta_config`).
    #[allow(clippy::too_many_arguments)]
    pub fn write_delta_config(
        config_file: &Path,
        name: &str,
        location: &str,
        ignore_time: bool,
        preserve_links: bool,
        modify_window: i64,
        content: bool,
    ) -> Result<()> {
        let mut ini = Ini::new();
        ini.with_section(Some(name))
            .set("location", location)
            .set("ignore_time", bool_str(ignore_time))
            .set("preserve_links", bool_str(preserve_links))
            .set("modify_window", modify_window.to_string())
            .set("content", bool_str(content));
        ini.write_to_file(config_file)
            .map_err(|e| ConfigError::Io {
                path: config_file.to_path_buf(),
                source: e,
            })?;
        Ok(())
    }

    /// Create or update `.synkrotron/config` with a template and a new
    /// `[name]` stanza (the `init` CLI command; original:
    /// `Config.init_remote`).
    pub fn init_remote(remote: &str, cwd: Option<PathBuf>) -> Result<()> {
        let cwd = cwd.map(Ok).unwrap_or_else(std::env::current_dir)?;
        let sync_dir = cwd.join(".synkrotron");
        if !sync_dir.exists() {
            fs::create_dir_all(&sync_dir)?;
        }
        let config_file = sync_dir.join("config");
        if !config_file.exists() {
            println!("Creating new configuration");
            fs::write(&config_file, TEMPLATE_COMMENTS).map_err(|e| ConfigError::Io {
                path: config_file.clone(),
                source: e,
            })?;
        } else {
            println!("Updating existing configuration");
        }
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&config_file)
            .map_err(|e| ConfigError::Io {
                path: config_file.clone(),
                source: e,
            })?;
        write!(file, "\n[{remote}]\nlocation: <HOST>:<PATH>\n").map_err(|e| ConfigError::Io {
            path: config_file.clone(),
            source: e,
        })?;
        println!("Please edit \".synkrotron/config\" to configure the new remote location.");
        Ok(())
    }
}

fn find_paths(cwd: Option<PathBuf>) -> Result<(PathBuf, PathBuf, String)> {
    let cwd = match cwd {
        Some(p) => p,
        None => std::env::current_dir()?,
    };
    let mut root = cwd.clone();
    loop {
        if root.join(".synkrotron").exists() {
            break;
        }
        match root.parent() {
            Some(parent) if parent != root => root = parent.to_path_buf(),
            _ => break,
        }
    }
    let sync_dir = root.join(".synkrotron");
    let config_file = sync_dir.join("config");
    if !config_file.is_file() {
        return Err(ConfigError::NotFound.into());
    }
    let rel_cwd = match cwd.strip_prefix(&root) {
        Ok(p) if p.as_os_str().is_empty() => ".".to_string(),
        Ok(p) => p.to_string_lossy().replace('\\', "/"),
        Err(_) => ".".to_string(),
    };
    Ok((root, sync_dir, rel_cwd))
}

fn split_list(joined: &str) -> Vec<String> {
    joined
        .split(':')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(ConfigError::Ini(format!("expected \"0\" or \"1\", got \"{raw}\"")).into()),
    }
}

fn bool_str(b: bool) -> &'static str {
    if b {
        "1"
    } else {
        "0"
    }
}

const TEMPLATE_COMMENTS: &str = "\
# Synkrotron configuration file defining remote locations.
#
# Each remote location is defined in a separate section starting with [<remote-name>].
# A section name identifying the remote location must be unique.
# The location itself is specified using the syntax \"HOST:PATH\" where \"HOST:\" is optional.
#
# In addition, the following options can be specified in a section:
#   clear:          List of files (separated by \":\") to be excluded from encryption if key is set.
#                   Filenames are relative with respect to the root of the synchronization directory.
#                   Leading slashes are ignored.
#   content:        Additionally compare files based on hashes of their contents if set to \"1\" (default is \"0\").
#                   Equivalent to using the \"-c\" command line switch.
#                   [Warning: Computing content hashes comes with a significant performance penalty.]
#   delete:         Delete all files at the destination that do not exist at the source location if set to \"1\" (default is \"0\").
#                   Equivalent to using the \"-d\" command line switch.
#   exclude:        List of file patterns (separated by \":\") for excluding files from the synchronization.
#                   Supports wildcard characters like \"?\" and \"*\".
#                   A \"/\" at the beginning of a pattern means it is matched starting from the root of the location.
#                   Trailing slashes are ignored.
#   preserve_links: Do not follow symbolic links during synchronization if set to \"1\" (default is \"0\").
#   ignore_time:    Ignore modification timestamps when comparing files if set to \"1\" (default is \"0\").
#   include:        Include only the listed files (separated by \":\"), i.e., exclude all other files.
#                   Patterns are specified similar to exclude except that they are always matched starting from the root.
#                   Therefore, leading slashes can be omitted.
#                   If a pattern matches a directory, all files within the directory are included as well.
#                   Note that exclude patterns take precedence over include patterns.
#   key:            Password of arbitrary length for encrypting files at the remote location.
#   modify_window:  Maximum allowed modification time difference (in seconds) for files to be considered unchanged (default is \"0\").
#   mount_point:    Mount the remote location at the specified mount point instead of mounting it in the \".synkrotron\" directory.
#
# Example:
# [backup]
# location: foo.org:/some/path
# key: some_passphrase
# exclude: *.log:*.bak
# clear: public_dir:data/public_file
#
";

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn loads_remote_with_defaults() {
        let dir = tempdir().unwrap();
        let sync_dir = dir.path().join(".synkrotron");
        fs::create_dir_all(&sync_dir).unwrap();
        fs::write(
            sync_dir.join("config"),
            "[backup]\nlocation: host:/path\nexclude: *.log:*.bak\n",
        )
        .unwrap();

        let config = Config::load(Some(dir.path().to_path_buf())).unwrap();
        let remote = config.remotes.get("backup").unwrap();
        assert_eq!(remote.location, "host:/path");
        assert_eq!(remote.exclude, vec!["*.log", "*.bak"]);
        assert!(!remote.content);
        assert_eq!(remote.modify_window, 0);
    }

    #[test]
    fn missing_location_is_a_config_error() {
        let dir = tempdir().unwrap();
        let sync_dir = dir.path().join(".synkrotron");
        fs::create_dir_all(&sync_dir).unwrap();
        fs::write(sync_dir.join("config"), "[backup]\nkey: secret\n").unwrap();

        let err = Config::load(Some(dir.path().to_path_buf())).unwrap_err();
        assert!(matches!(
            err,
            crate::error::SynkrotronError::Config(ConfigError::MissingLocation(_))
        ));
    }

    #[test]
    fn unknown_option_is_rejected() {
        let dir = tempdir().unwrap();
        let sync_dir = dir.path().join(".synkrotron");
        fs::create_dir_all(&sync_dir).unwrap();
        fs::write(
            sync_dir.join("config"),
            "[backup]\nlocation: /path\nbogus: 1\n",
        )
        .unwrap();

        let err = Config::load(Some(dir.path().to_path_buf())).unwrap_err();
        assert!(matches!(
            err,
            crate::error::SynkrotronError::Config(ConfigError::UnknownOption { .. })
        ));
    }

    #[test]
    fn no_config_file_is_not_found() {
        let dir = tempdir().unwrap();
        let err = Config::load(Some(dir.path().to_path_buf())).unwrap_err();
        assert!(matches!(
            err,
            crate::error::SynkrotronError::Config(ConfigError::NotFound)
        ));
    }
}
