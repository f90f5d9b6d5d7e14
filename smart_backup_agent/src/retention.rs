//! Snapshot retention: keep the newest N snapshot directories, delete the rest.

use crate::error::RetentionError;
use crate::types::SNAPSHOT_PREFIX;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub kept: Vec<String>,
    pub removed: Vec<String>,
    pub failed: Vec<String>,
}

type Remover = fn(&Path) -> io::Result<()>;

pub struct RetentionManager {
    backup_root: PathBuf,
    keep: usize,
    remove: Remover,
}

impl RetentionManager {
    pub fn new(backup_root: impl Into<PathBuf>, keep: usize) -> Self {
        Self {
            backup_root: backup_root.into(),
            keep,
            remove: |dir: &Path| fs::remove_dir_all(dir),
        }
    }

    #[cfg(test)]
    fn with_remover(mut self, remove: Remover) -> Self {
        self.remove = remove;
        self
    }

    /// Snapshot directory names under the backup root, newest first. Names embed a
    /// `%Y%m%d_%H%M%S` stamp so reverse name order is reverse chronological order.
    pub fn snapshots(&self) -> Result<Vec<String>, RetentionError> {
        let err = |source| RetentionError {
            path: self.backup_root.clone(),
            source,
        };
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.backup_root).map_err(err)? {
            let entry = entry.map_err(err)?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with(SNAPSHOT_PREFIX) && entry.path().is_dir() {
                names.push(name);
            }
        }
        names.sort_unstable_by(|a, b| b.cmp(a));
        Ok(names)
    }

    /// Delete everything past the newest `keep` snapshots. A snapshot that fails to
    /// delete is logged and skipped; the remaining candidates are still attempted.
    pub fn prune(&self) -> Result<PruneReport, RetentionError> {
        let mut names = self.snapshots()?;
        let stale = names.split_off(self.keep.min(names.len()));
        let mut report = PruneReport {
            kept: names,
            ..PruneReport::default()
        };
        for name in stale {
            match (self.remove)(&self.backup_root.join(&name)) {
                Ok(()) => {
                    info!("removed old snapshot {name}");
                    report.removed.push(name);
                }
                Err(e) => {
                    warn!("failed to remove old snapshot {name}: {e}");
                    report.failed.push(name);
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(root: &Path, stamps: &[&str]) {
        for s in stamps {
            let dir = root.join(format!("{SNAPSHOT_PREFIX}{s}"));
            fs::create_dir_all(dir.join(".opencode")).unwrap();
            fs::write(dir.join("backup_report.txt"), "x").unwrap();
        }
    }

    #[test]
    fn keeps_newest_and_ignores_unrelated_entries() {
        let td = tempfile::tempdir().unwrap();
        let root = td.path();
        seed(root, &["20240101_000000", "20240103_000000", "20240102_000000"]);
        fs::write(root.join("smart_backup_20230101_000000"), "a file, not a dir").unwrap();
        fs::create_dir_all(root.join("other_20200101_000000")).unwrap();
        fs::write(root.join("backup_state.json"), "{}").unwrap();

        let report = RetentionManager::new(root, 2).prune().unwrap();
        assert_eq!(
            report.kept,
            vec!["smart_backup_20240103_000000", "smart_backup_20240102_000000"]
        );
        assert_eq!(report.removed, vec!["smart_backup_20240101_000000"]);
        assert!(report.failed.is_empty());
        assert!(root.join("smart_backup_20230101_000000").is_file());
        assert!(root.join("other_20200101_000000").is_dir());
        assert!(root.join("backup_state.json").is_file());
    }

    #[test]
    fn fewer_than_bound_is_a_no_op() {
        let td = tempfile::tempdir().unwrap();
        seed(td.path(), &["20240101_000000"]);
        let report = RetentionManager::new(td.path(), 5).prune().unwrap();
        assert_eq!(report.kept.len(), 1);
        assert!(report.removed.is_empty());
    }

    #[test]
    fn zero_keep_removes_everything() {
        let td = tempfile::tempdir().unwrap();
        seed(td.path(), &["20240101_000000", "20240102_000000"]);
        let report = RetentionManager::new(td.path(), 0).prune().unwrap();
        assert!(report.kept.is_empty());
        assert_eq!(report.removed.len(), 2);
        assert!(RetentionManager::new(td.path(), 0).snapshots().unwrap().is_empty());
    }

    #[test]
    fn undeletable_snapshot_does_not_stop_the_rest() {
        let td = tempfile::tempdir().unwrap();
        let root = td.path();
        seed(
            root,
            &["20240101_000000", "20240102_000000", "20240103_000000", "20240104_000000"],
        );
        let report = RetentionManager::new(root, 1)
            .with_remover(|dir: &Path| {
                if dir.ends_with("smart_backup_20240102_000000") {
                    Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"))
                } else {
                    fs::remove_dir_all(dir)
                }
            })
            .prune()
            .unwrap();

        assert_eq!(report.kept, vec!["smart_backup_20240104_000000"]);
        assert_eq!(
            report.removed,
            vec!["smart_backup_20240103_000000", "smart_backup_20240101_000000"]
        );
        assert_eq!(report.failed, vec!["smart_backup_20240102_000000"]);
        assert!(root.join("smart_backup_20240102_000000").is_dir());
        assert!(!root.join("smart_backup_20240101_000000").exists());
    }

    #[test]
    fn missing_root_is_an_error() {
        let td = tempfile::tempdir().unwrap();
        let err = RetentionManager::new(td.path().join("gone"), 5)
            .prune()
            .unwrap_err();
        assert!(err.path.ends_with("gone"));
    }
}
