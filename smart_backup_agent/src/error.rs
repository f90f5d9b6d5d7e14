//! Error types for the backup agent. One enum per concern so callers can tell a
//! failed sample from a failed copy without string matching.

use std::path::PathBuf;
use thiserror::Error;

/// Resource sampling failed as a whole (individual processes are skipped, not errors).
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("sysinfo refresh panicked: {0}")]
    Panicked(String),

    #[error("total memory reported as zero")]
    NoMemoryInfo,

    #[error("sampling unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum StateError {
    #[error("state file I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bad timestamp {value:?} in state file")]
    Timestamp { value: String },
}

/// Which step of a snapshot run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotStep {
    CreateDir,
    CopyFiles,
    CopyConfigTree,
    WriteManifest,
    Mirror,
}

impl std::fmt::Display for SnapshotStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SnapshotStep::CreateDir => "create snapshot directory",
            SnapshotStep::CopyFiles => "copy source files",
            SnapshotStep::CopyConfigTree => "copy config subtree",
            SnapshotStep::WriteManifest => "write manifest",
            SnapshotStep::Mirror => "update live mirror",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
#[error("snapshot failed to {step} at {path}: {source}")]
pub struct SnapshotError {
    pub step: SnapshotStep,
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

impl SnapshotError {
    pub fn new(step: SnapshotStep, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self {
            step,
            path: path.into(),
            source,
        }
    }
}

#[derive(Error, Debug)]
#[error("cannot list backup root {path}: {source}")]
pub struct RetentionError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Failures that abort a whole monitor cycle and trigger the cooldown.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("backup root {path} unavailable: {source}")]
    BackupRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cycle worker panicked: {0}")]
    Panicked(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file {path} is malformed: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Usage(String),
}

/// Render a panic payload the way `catch_unwind`/`JoinError` hand it to us.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
