//! Idle classification: a conservative "is it safe to copy files now" heuristic.
//! Pure observation; nothing here throttles or suspends other processes.

use crate::types::LoadSnapshot;

pub const MIB: u64 = 1024 * 1024;

/// Bounds a load snapshot must stay within to count as idle.
/// Every check is strictly-greater-than: a value equal to its bound is still idle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdleThresholds {
    pub max_cpu_percent: f32,
    pub max_mem_percent: f32,
    pub max_busy_processes: usize,
    /// Per-process CPU% above which a process counts as busy.
    pub busy_process_cpu_percent: f32,
    /// Applies to sent and received bytes independently.
    pub max_net_bytes: u64,
}

impl Default for IdleThresholds {
    fn default() -> Self {
        Self {
            max_cpu_percent: 10.0,
            max_mem_percent: 60.0,
            max_busy_processes: 2,
            busy_process_cpu_percent: 5.0,
            max_net_bytes: MIB,
        }
    }
}

/// Why a snapshot was classified as busy (first violated bound wins).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BusyReason {
    Cpu(f32),
    Memory(f32),
    BusyProcesses(usize),
    NetSent(u64),
    NetRecv(u64),
}

impl std::fmt::Display for BusyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusyReason::Cpu(v) => write!(f, "cpu at {v:.1}%"),
            BusyReason::Memory(v) => write!(f, "memory at {v:.1}%"),
            BusyReason::BusyProcesses(n) => write!(f, "{n} busy processes"),
            BusyReason::NetSent(b) => write!(f, "{b} bytes sent"),
            BusyReason::NetRecv(b) => write!(f, "{b} bytes received"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IdleVerdict {
    Idle,
    Busy(BusyReason),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdleClassifier {
    thresholds: IdleThresholds,
}

impl IdleClassifier {
    pub fn new(thresholds: IdleThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &IdleThresholds {
        &self.thresholds
    }

    pub fn verdict(&self, s: &LoadSnapshot) -> IdleVerdict {
        let t = &self.thresholds;
        if s.cpu_percent.is_nan() || s.cpu_percent > t.max_cpu_percent {
            return IdleVerdict::Busy(BusyReason::Cpu(s.cpu_percent));
        }
        if s.mem_percent.is_nan() || s.mem_percent > t.max_mem_percent {
            return IdleVerdict::Busy(BusyReason::Memory(s.mem_percent));
        }
        if s.busy_process_count > t.max_busy_processes {
            return IdleVerdict::Busy(BusyReason::BusyProcesses(s.busy_process_count));
        }
        if s.net_bytes_sent > t.max_net_bytes {
            return IdleVerdict::Busy(BusyReason::NetSent(s.net_bytes_sent));
        }
        if s.net_bytes_recv > t.max_net_bytes {
            return IdleVerdict::Busy(BusyReason::NetRecv(s.net_bytes_recv));
        }
        IdleVerdict::Idle
    }

    pub fn is_idle(&self, s: &LoadSnapshot) -> bool {
        matches!(self.verdict(s), IdleVerdict::Idle)
    }
}

/// Count processes whose CPU% is strictly above `threshold`. A `None` reading is a
/// process we could not query (vanished, access denied); it is skipped.
pub fn count_busy_processes<I>(readings: I, threshold: f32) -> usize
where
    I: IntoIterator<Item = Option<f32>>,
{
    readings
        .into_iter()
        .flatten()
        .filter(|cpu| *cpu > threshold)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_bounds() -> LoadSnapshot {
        LoadSnapshot {
            cpu_percent: 10.0,
            mem_percent: 60.0,
            busy_process_count: 2,
            net_bytes_sent: MIB,
            net_bytes_recv: MIB,
        }
    }

    #[test]
    fn exactly_at_every_bound_is_idle() {
        let c = IdleClassifier::default();
        assert!(c.is_idle(&at_bounds()));
        assert!(c.is_idle(&LoadSnapshot::default()));
    }

    #[test]
    fn each_bound_alone_flips_to_busy() {
        let c = IdleClassifier::default();
        let cases: Vec<(LoadSnapshot, BusyReason)> = vec![
            (
                LoadSnapshot { cpu_percent: 10.1, ..at_bounds() },
                BusyReason::Cpu(10.1),
            ),
            (
                LoadSnapshot { mem_percent: 60.5, ..at_bounds() },
                BusyReason::Memory(60.5),
            ),
            (
                LoadSnapshot { busy_process_count: 3, ..at_bounds() },
                BusyReason::BusyProcesses(3),
            ),
            (
                LoadSnapshot { net_bytes_sent: MIB + 1, ..at_bounds() },
                BusyReason::NetSent(MIB + 1),
            ),
            (
                LoadSnapshot { net_bytes_recv: MIB + 1, ..at_bounds() },
                BusyReason::NetRecv(MIB + 1),
            ),
        ];
        for (snap, reason) in cases {
            assert_eq!(c.verdict(&snap), IdleVerdict::Busy(reason), "{snap:?}");
            assert!(!c.is_idle(&snap));
        }
    }

    #[test]
    fn nan_cpu_reading_is_busy() {
        let c = IdleClassifier::default();
        let snap = LoadSnapshot { cpu_percent: f32::NAN, ..LoadSnapshot::default() };
        assert!(!c.is_idle(&snap));
    }

    #[test]
    fn custom_thresholds_are_honoured() {
        let c = IdleClassifier::new(IdleThresholds {
            max_cpu_percent: 50.0,
            ..IdleThresholds::default()
        });
        let snap = LoadSnapshot { cpu_percent: 40.0, ..LoadSnapshot::default() };
        assert!(c.is_idle(&snap));
    }

    #[test]
    fn busy_count_skips_failed_readings() {
        let readings = vec![Some(0.0), None, Some(5.0), Some(5.1), None, Some(80.0)];
        assert_eq!(count_busy_processes(readings, 5.0), 2);
        assert_eq!(count_busy_processes(Vec::<Option<f32>>::new(), 5.0), 0);
    }
}
