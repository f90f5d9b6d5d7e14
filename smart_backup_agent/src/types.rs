//! Plain data shared between the agent's components.
//! Keep this module free of I/O; it only describes values.

use chrono::{DateTime, Local};
use std::path::PathBuf;

/// Prefix shared by every snapshot directory name. The suffix is a
/// `%Y%m%d_%H%M%S` timestamp, so lexicographic order is chronological.
pub const SNAPSHOT_PREFIX: &str = "smart_backup_";

/// Point-in-time view of system load, taken fresh for every idle check.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LoadSnapshot {
    pub cpu_percent: f32,
    pub mem_percent: f32,
    // processes individually above the busy-process CPU threshold
    pub busy_process_count: usize,
    // bytes moved across all interfaces during the sampling window
    pub net_bytes_sent: u64,
    pub net_bytes_recv: u64,
}

/// The only durable state of the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackupState {
    pub last_backup: Option<DateTime<Local>>,
    pub last_check: Option<DateTime<Local>>,
}

impl BackupState {
    /// Record a successful backup at `at`. The stored value never moves backwards,
    /// even if the wall clock does.
    pub fn record_backup(&mut self, at: DateTime<Local>) {
        self.last_backup = Some(match self.last_backup {
            Some(prev) if prev > at => prev,
            _ => at,
        });
        self.last_check = Some(at);
    }

    /// Hours elapsed since the last backup, if there was one.
    pub fn hours_since_backup(&self, now: DateTime<Local>) -> Option<f64> {
        self.last_backup
            .map(|t| now.signed_duration_since(t).num_seconds() as f64 / 3600.0)
    }
}

/// Identity of a snapshot directory under the backup root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotId {
    pub name: String,
    pub path: PathBuf,
}

impl SnapshotId {
    pub fn name_for(at: DateTime<Local>) -> String {
        format!("{SNAPSHOT_PREFIX}{}", at.format("%Y%m%d_%H%M%S"))
    }
}

/// Which half of the monitor loop we are in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    IdleWaiting,
    BackingUp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn snapshot_name_is_sortable_timestamp() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(SnapshotId::name_for(at), "smart_backup_20240309_070501");
        let later = at + Duration::seconds(60 * 60 * 5);
        assert!(SnapshotId::name_for(later) > SnapshotId::name_for(at));
    }

    #[test]
    fn record_backup_never_goes_backwards() {
        let t1 = Local.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap();
        let t0 = t1 - Duration::hours(3);
        let mut st = BackupState::default();
        st.record_backup(t1);
        st.record_backup(t0);
        assert_eq!(st.last_backup, Some(t1));
        assert_eq!(st.last_check, Some(t0));
    }

    #[test]
    fn hours_since_backup() {
        let now = Local.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap();
        let st = BackupState {
            last_backup: Some(now - Duration::minutes(90)),
            last_check: None,
        };
        assert_eq!(st.hours_since_backup(now), Some(1.5));
        assert_eq!(BackupState::default().hours_since_backup(now), None);
    }
}
