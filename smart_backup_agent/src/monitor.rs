//! Monitor loop: every poll period, decide whether to back up and, if so, snapshot,
//! prune and persist state. Each cycle runs on the blocking pool since sampling and
//! copying are synchronous; a failed or panicking cycle costs one cooldown, never the loop.

use crate::config::Config;
use crate::error::{panic_message, CycleError, SnapshotError};
use crate::idle::IdleClassifier;
use crate::probe::LoadProbe;
use crate::retention::RetentionManager;
use crate::scheduler::{BackupScheduler, Decision};
use crate::snapshot::{SnapshotExecutor, SnapshotReport};
use crate::state::BackupStateStore;
use crate::types::{BackupState, Phase};
use chrono::{DateTime, Local};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub enum CycleOutcome {
    Skipped(Decision),
    BackedUp(SnapshotReport),
    /// The snapshot attempt failed; `last_backup` was not advanced.
    Failed(SnapshotError),
}

/// Everything one backup cycle needs, wired from a single `Config`.
pub struct BackupAgent {
    backup_root: std::path::PathBuf,
    probe: Box<dyn LoadProbe>,
    scheduler: BackupScheduler,
    executor: SnapshotExecutor,
    retention: RetentionManager,
    store: BackupStateStore,
    state: BackupState,
    phase: Phase,
}

impl BackupAgent {
    /// Build the agent and restore persisted state.
    pub fn new(cfg: &Config, probe: Box<dyn LoadProbe>) -> Self {
        let store = BackupStateStore::new(cfg.state_file());
        let state = store.load();
        if let Some(t) = state.last_backup {
            info!("last backup at {}", t.format("%Y-%m-%d %H:%M:%S"));
        }
        Self {
            backup_root: cfg.backup_root.clone(),
            probe,
            scheduler: BackupScheduler::new(
                cfg.min_interval,
                IdleClassifier::new(cfg.thresholds),
            ),
            executor: SnapshotExecutor::new(cfg),
            retention: RetentionManager::new(&cfg.backup_root, cfg.retention),
            store,
            state,
            phase: Phase::IdleWaiting,
        }
    }

    pub fn state(&self) -> &BackupState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn run_cycle(&mut self) -> Result<CycleOutcome, CycleError> {
        self.run_cycle_at(Local::now())
    }

    pub fn run_cycle_at(&mut self, now: DateTime<Local>) -> Result<CycleOutcome, CycleError> {
        info!("running backup check");
        std::fs::create_dir_all(&self.backup_root).map_err(|source| CycleError::BackupRoot {
            path: self.backup_root.clone(),
            source,
        })?;
        self.state.last_check = Some(now);

        let decision = self.scheduler.decide(&self.state, now, &mut self.probe);
        if !decision.is_run() {
            match (&decision, self.state.hours_since_backup(now)) {
                (Decision::IntervalNotElapsed { .. }, Some(h)) => {
                    info!("backup interval not reached ({h:.1}h since last backup)")
                }
                (Decision::Busy(reason), Some(h)) => {
                    info!("system busy ({reason}), {h:.1}h since last backup")
                }
                (Decision::Busy(reason), None) => info!("system busy ({reason}), not backing up"),
                _ => info!("not backing up this cycle"),
            }
            return Ok(CycleOutcome::Skipped(decision));
        }

        info!("system idle, starting backup");
        self.set_phase(Phase::BackingUp);
        let outcome = match self.executor.run(now) {
            Ok(report) => {
                match self.retention.prune() {
                    Ok(r) if !r.removed.is_empty() || !r.failed.is_empty() => debug!(
                        "retention: kept {}, removed {}, failed {}",
                        r.kept.len(),
                        r.removed.len(),
                        r.failed.len()
                    ),
                    Ok(_) => {}
                    Err(e) => warn!("snapshot pruning failed: {e}"),
                }
                self.state.record_backup(Local::now());
                self.store.save(&self.state);
                info!("backup completed: {}", report.id.name);
                CycleOutcome::BackedUp(report)
            }
            Err(e) => {
                error!("backup failed: {e}");
                CycleOutcome::Failed(e)
            }
        };
        self.set_phase(Phase::IdleWaiting);
        Ok(outcome)
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!("phase {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }
}

pub struct MonitorLoop {
    agent: Arc<Mutex<BackupAgent>>,
    poll_period: Duration,
    cooldown: Duration,
}

impl MonitorLoop {
    pub fn new(agent: BackupAgent, poll_period: Duration, cooldown: Duration) -> Self {
        Self {
            agent: Arc::new(Mutex::new(agent)),
            poll_period,
            cooldown,
        }
    }

    /// Run one cycle on the blocking pool. Panics inside the cycle come back as
    /// `CycleError::Panicked`.
    pub async fn run_once(&self) -> Result<CycleOutcome, CycleError> {
        let agent = Arc::clone(&self.agent);
        let joined = tokio::task::spawn_blocking(move || {
            // A previous cycle may have panicked while holding the lock; the agent's
            // state is still the last consistent one, so keep going with it.
            let mut agent = agent.lock().unwrap_or_else(PoisonError::into_inner);
            agent.run_cycle()
        })
        .await;
        match joined {
            Ok(res) => res,
            Err(e) if e.is_panic() => Err(CycleError::Panicked(panic_message(&*e.into_panic()))),
            Err(e) => Err(CycleError::Panicked(e.to_string())),
        }
    }

    /// Loop until `shutdown` resolves. Shutdown is observed between cycles only;
    /// a snapshot in progress always runs to completion.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            "monitor started: poll every {}s, cooldown {}s",
            self.poll_period.as_secs(),
            self.cooldown.as_secs()
        );
        loop {
            let pause = match self.run_once().await {
                Ok(_) => self.poll_period,
                Err(e) => {
                    error!("monitor cycle failed: {e}");
                    self.cooldown
                }
            };
            tokio::select! {
                _ = sleep(pause) => {}
                _ = &mut shutdown => break,
            }
        }
        info!("monitor stopped");
    }

    pub fn state(&self) -> BackupState {
        *self.agent.lock().unwrap_or_else(PoisonError::into_inner).state()
    }
}
