//! Durable agent state: when the last successful backup happened.
//! Stored as a small JSON object next to the snapshots, overwritten in place.

use crate::error::StateError;
use crate::types::BackupState;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// On-disk shape. Empty strings mean "never".
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct StateFile {
    #[serde(default)]
    last_backup: String,
    #[serde(default)]
    last_check: String,
}

pub struct BackupStateStore {
    path: PathBuf,
}

impl BackupStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state. Never fails: a missing file is a first run, and an
    /// unreadable or corrupt one is logged and treated the same way.
    pub fn load(&self) -> BackupState {
        match self.read() {
            Ok(Some(state)) => state,
            Ok(None) => BackupState::default(),
            Err(e) => {
                warn!("failed to load backup state from {}: {e}", self.path.display());
                BackupState::default()
            }
        }
    }

    /// Persist `state`. Returns false (after logging) when the write did not land;
    /// the caller keeps its in-memory state and the next save retries.
    pub fn save(&self, state: &BackupState) -> bool {
        match self.write(state) {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to save backup state to {}: {e}", self.path.display());
                false
            }
        }
    }

    pub fn read(&self) -> Result<Option<BackupState>, StateError> {
        let s = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StateError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let file: StateFile = serde_json::from_str(&s)?;
        Ok(Some(BackupState {
            last_backup: parse_instant(&file.last_backup)?,
            last_check: parse_instant(&file.last_check)?,
        }))
    }

    /// Serialize to a sibling temp file, then rename over the target so a crash
    /// mid-write leaves either the old file or the new one.
    pub fn write(&self, state: &BackupState) -> Result<(), StateError> {
        let file = StateFile {
            last_backup: state.last_backup.map(|t| t.to_rfc3339()).unwrap_or_default(),
            last_check: state.last_check.map(|t| t.to_rfc3339()).unwrap_or_default(),
        };
        let data = serde_json::to_vec_pretty(&file)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data).map_err(|source| StateError::Io {
            path: tmp.clone(),
            source,
        })?;
        if let Err(source) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(StateError::Io {
                path: self.path.clone(),
                source,
            });
        }
        Ok(())
    }
}

/// Accept RFC 3339, or a naive ISO-8601 timestamp (taken as local time). Empty means unset.
fn parse_instant(s: &str) -> Result<Option<DateTime<Local>>, StateError> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(None);
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(Some(t.with_timezone(&Local)));
    }
    let bad = || StateError::Timestamp {
        value: s.to_string(),
    };
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").map_err(|_| bad())?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(Some)
        .ok_or_else(bad)
}
