//! Decides whether a backup should fire now: the cheap interval gate first,
//! then a fresh load sample through the idle classifier.

use crate::idle::{BusyReason, IdleClassifier, IdleVerdict};
use crate::probe::LoadProbe;
use crate::types::BackupState;
use chrono::{DateTime, Local};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Last backup is more recent than the minimum interval.
    IntervalNotElapsed { since: chrono::Duration },
    Busy(BusyReason),
    /// Sampling failed altogether; treated as busy.
    ProbeFailed,
    Run,
}

impl Decision {
    pub fn is_run(&self) -> bool {
        matches!(self, Decision::Run)
    }
}

pub struct BackupScheduler {
    min_interval: chrono::Duration,
    classifier: IdleClassifier,
}

impl BackupScheduler {
    pub fn new(min_interval: Duration, classifier: IdleClassifier) -> Self {
        Self {
            min_interval: chrono::Duration::from_std(min_interval)
                .unwrap_or(chrono::Duration::MAX),
            classifier,
        }
    }

    pub fn decide<P: LoadProbe + ?Sized>(
        &self,
        state: &BackupState,
        now: DateTime<Local>,
        probe: &mut P,
    ) -> Decision {
        if let Some(last) = state.last_backup {
            let since = now.signed_duration_since(last);
            if since < self.min_interval {
                return Decision::IntervalNotElapsed { since };
            }
        }
        match probe.sample() {
            Ok(snapshot) => match self.classifier.verdict(&snapshot) {
                IdleVerdict::Idle => Decision::Run,
                IdleVerdict::Busy(reason) => Decision::Busy(reason),
            },
            Err(e) => {
                warn!("system load sampling failed: {e}");
                Decision::ProbeFailed
            }
        }
    }

    pub fn should_run<P: LoadProbe + ?Sized>(
        &self,
        state: &BackupState,
        now: DateTime<Local>,
        probe: &mut P,
    ) -> bool {
        self.decide(state, now, probe).is_run()
    }
}
