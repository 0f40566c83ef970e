//! Error types shared by the synchronization core.
//!
//! Conflicts and per-file I/O failures during extraction are *not* errors: they
//! are collected as [`crate::installer::Outcome`]s so a plan always runs to the
//! end. Everything here aborts the operation that raised it.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Boxed cause for failures that can originate from several layers
/// (HTTP, decompression, disk).
pub type Cause = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// A metadata request to the remote failed before any response arrived.
    #[error("network request to {remote} failed while {action}")]
    Network {
        remote: String,
        action: String,
        #[source]
        cause: reqwest::Error,
    },

    /// The remote answered with an unexpected status.
    #[error("{url} answered with HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    /// Downloading or unpacking a version failed. The staging area has
    /// already been discarded when this is returned.
    #[error("failed to fetch version '{version}' from {remote}")]
    Fetch {
        version: String,
        remote: String,
        #[source]
        cause: Cause,
    },

    /// A cache directory exists but does not hold a complete entry.
    #[error("cache entry '{label}' at {path} is unusable: {reason}")]
    CacheCorruption {
        label: String,
        path: PathBuf,
        reason: String,
    },

    #[error("could not parse {path}\n\nRepair the file by hand, or delete it and run `guidekit init` again")]
    ConfigParse {
        path: PathBuf,
        #[source]
        cause: toml::de::Error,
    },

    #[error("could not serialize project config for {path}")]
    ConfigWrite {
        path: PathBuf,
        #[source]
        cause: toml::ser::Error,
    },

    #[error("unknown component type '{0}' (expected language, framework, workflow or template)")]
    UnknownKind(String),

    #[error("unknown {kind} '{name}'")]
    UnknownComponent { kind: String, name: String },

    #[error("{kind} '{name}' is not installed, nothing to remove")]
    NotInstalled { kind: String, name: String },

    /// The selected version does not ship a component's source path.
    #[error("version '{version}' does not contain {component} (expected {path})")]
    MissingSource {
        component: String,
        version: String,
        path: PathBuf,
    },

    #[error("no backup found for {0}")]
    NoBackup(PathBuf),

    /// The project has no config yet; only `init` and `add` create one.
    #[error("{0} does not exist; run `guidekit init` first")]
    NotInitialized(PathBuf),

    #[error("I/O error at {path}")]
    Io {
        path: PathBuf,
        #[source]
        cause: std::io::Error,
    },
}

impl SyncError {
    pub fn io(path: impl Into<PathBuf>, cause: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            cause,
        }
    }

    /// True for the "unknown thing" family: the user named something that
    /// does not exist, and no action was taken.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SyncError::UnknownKind(_)
                | SyncError::UnknownComponent { .. }
                | SyncError::NotInstalled { .. }
                | SyncError::MissingSource { .. }
                | SyncError::NoBackup(_)
                | SyncError::NotInitialized(_)
        )
    }
}
