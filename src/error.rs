//! Error taxonomy. See spec.md §7 / SPEC_FULL.md §7.
//!
//! `StatSkip` deliberately has no variant here: per-file stat failures
//! during a walk are logged and swallowed, never propagated.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration file found")]
    NotFound,
    #[error("unknown option \"{option}\" for {remote} (supported options: {supported})")]
    UnknownOption {
        option: String,
        remote: String,
        supported: String,
    },
    #[error("no location specified for {0}")]
    MissingLocation(String),
    #[error("unknown remote name \"{0}\"")]
    UnknownRemote(String),
    #[error("clear option \"{0}\" points outside of the main directory")]
    ClearOutsideRoot(String),
    #[error("delta directory must be local")]
    DeltaMustBeLocal,
    #[error("failed to read or write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration file: {0}")]
    Ini(String),
}

#[derive(Debug, Error)]
pub enum MountError {
    #[error("{0} is not a valid directory")]
    InvalidLocation(String),
    #[error("already mounted at {0}")]
    AlreadyMounted(PathBuf),
    #[error("already reverse-mounted at {0}")]
    AlreadyReverseMounted(PathBuf),
    #[error("unable to mount {location} with {tool}")]
    MountFailed { tool: &'static str, location: String },
    #[error("unable to reverse mount {0} with encfs")]
    ReverseMountFailed(PathBuf),
    #[error("unmounting {tool} at {path} failed")]
    UnmountFailed { tool: &'static str, path: PathBuf },
    #[error("mount point {0} exists but is not a link")]
    MountPointNotLink(PathBuf),
    #[error("remote must be mounted with encfs before it can be reverse-mounted")]
    NotYetMounted,
    #[error("required external tool \"{0}\" was not found on PATH")]
    ToolMissing(&'static str),
}

#[derive(Debug, Error)]
#[error("external helper \"{tool}\" failed: {reason}")]
pub struct ExternalHelperError {
    pub tool: &'static str,
    pub reason: String,
}

#[derive(Debug, Error)]
#[error("malformed output from remote invocation: {0}")]
pub struct ProtocolError(pub String);

#[derive(Debug, Error)]
pub enum SynkrotronError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Mount(#[from] MountError),
    #[error(transparent)]
    ExternalHelper(#[from] ExternalHelperError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, SynkrotronError>;
