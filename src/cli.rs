//! Command-line parsing (spec.md §6 / SPEC_FULL.md §6.2), exact flag parity
//! with `examples/original_source/src/synkrotron.py`'s `argparse` setup,
//! translated to the teacher's `lexopt` style.

use std::path::PathBuf;

use lexopt::{Arg, Parser};

use crate::error::{ConfigError, Result, SynkrotronError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Init,
    Mount,
    Umount,
    Diff,
    Pull,
    Push,
}

impl Command {
    fn parse(raw: &str) -> Option<Command> {
        match raw {
            "init" => Some(Command::Init),
            "mount" => Some(Command::Mount),
            "umount" => Some(Command::Umount),
            "diff" => Some(Command::Diff),
            "pull" => Some(Command::Pull),
            "push" => Some(Command::Push),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct Cli {
    pub command: Command,
    pub remote: String,
    pub path: Option<String>,
    pub umount: bool,
    pub simulate: bool,
    pub delete: bool,
    pub ignore_time: bool,
    pub content: bool,
    pub verbose: bool,
    pub delta: Option<PathBuf>,
}

/// Parse `init | mount | umount | diff | pull | push <remote>` plus flags.
pub fn parse_args() -> Result<Cli> {
    let mut command: Option<Command> = None;
    let mut remote: Option<String> = None;
    let mut path = None;
    let mut umount = false;
    let mut simulate = false;
    let mut delete = false;
    let mut ignore_time = false;
    let mut content = false;
    let mut verbose = false;
    let mut delta = None;

    let mut parser = Parser::from_env();
    while let Some(arg) = parser.next().map_err(arg_err)? {
        match arg {
            Arg::Short('p') | Arg::Long("path") => {
                let v = parser.value().map_err(arg_err)?;
                path = Some(v.into_string().map_err(|v| invalid_unicode(&v))?);
            }
            Arg::Short('u') | Arg::Long("umount") => umount = true,
            Arg::Short('s') | Arg::Long("simulate") => simulate = true,
            Arg::Short('d') | Arg::Long("delete") => delete = true,
            Arg::Short('i') | Arg::Long("ignore-time") => ignore_time = true,
            Arg::Short('c') | Arg::Long("content") => content = true,
            Arg::Short('v') | Arg::Long("verbose") => verbose = true,
            Arg::Long("delta") => {
                let v = parser.value().map_err(arg_err)?;
                delta = Some(PathBuf::from(v));
            }
            Arg::Value(val) => {
                let val = val.into_string().map_err(|v| invalid_unicode(&v))?;
                if command.is_none() {
                    command = Some(Command::parse(&val).ok_or_else(|| {
                        SynkrotronError::Other(format!(
                            "invalid command \"{val}\" (expected init, mount, umount, diff, pull, or push)"
                        ))
                    })?);
                } else if remote.is_none() {
                    remote = Some(val);
                } else {
                    return Err(SynkrotronError::Other(format!("unexpected argument \"{val}\"")));
                }
            }
            _ => {}
        }
    }

    let command = command
        .ok_or_else(|| SynkrotronError::Other("missing command".to_string()))?;
    let remote = remote
        .ok_or_else(|| SynkrotronError::Other("missing remote name".to_string()))?;

    Ok(Cli {
        command,
        remote,
        path,
        umount,
        simulate,
        delete,
        ignore_time,
        content,
        verbose,
        delta,
    })
}

fn arg_err(e: impl std::fmt::Display) -> SynkrotronError {
    ConfigError::Ini(e.to_string()).into()
}

fn invalid_unicode(v: &std::ffi::OsStr) -> SynkrotronError {
    SynkrotronError::Other(format!("invalid unicode in argument: {v:?}"))
}
