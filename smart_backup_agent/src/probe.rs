//! System load sampling using sysinfo.

use crate::error::{panic_message, ProbeError};
use crate::idle::count_busy_processes;
use crate::types::LoadSnapshot;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use sysinfo::{
    CpuRefreshKind, MemoryRefreshKind, Networks, ProcessRefreshKind, ProcessesToUpdate,
    RefreshKind, System,
};
use tracing::debug;

/// Source of load snapshots. The real one talks to the OS; tests plug in fakes.
pub trait LoadProbe: Send {
    /// Take a fresh sample. May block for the sampling window.
    fn sample(&mut self) -> Result<LoadSnapshot, ProbeError>;
}

impl<P: LoadProbe + ?Sized> LoadProbe for Box<P> {
    fn sample(&mut self) -> Result<LoadSnapshot, ProbeError> {
        (**self).sample()
    }
}

/// Probe backed by persistent sysinfo handles, so CPU and network deltas are
/// measured across the sampling window rather than since boot.
pub struct SysinfoProbe {
    sys: System,
    nets: Networks,
    window: Duration,
    busy_cpu_percent: f32,
}

impl SysinfoProbe {
    pub fn new(window: Duration, busy_cpu_percent: f32) -> Self {
        let refresh_kind = RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::nothing().with_cpu_usage())
            .with_memory(MemoryRefreshKind::nothing().with_ram());
        Self {
            sys: System::new_with_specifics(refresh_kind),
            nets: Networks::new_with_refreshed_list(),
            // sysinfo needs at least this long between refreshes for a meaningful CPU%
            window: window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL),
            busy_cpu_percent,
        }
    }

    fn refresh(&mut self) -> Result<(), ProbeError> {
        let Self { sys, nets, .. } = self;
        catch_unwind(AssertUnwindSafe(|| {
            sys.refresh_cpu_usage();
            sys.refresh_memory();
            // Only CPU times: name/cmd/env are not needed for the busy count.
            sys.refresh_processes_specifics(
                ProcessesToUpdate::All,
                true,
                ProcessRefreshKind::nothing().with_cpu(),
            );
            nets.refresh(true);
        }))
        .map_err(|e| ProbeError::Panicked(panic_message(&*e)))
    }
}

impl LoadProbe for SysinfoProbe {
    fn sample(&mut self) -> Result<LoadSnapshot, ProbeError> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(ProbeError::Unavailable(format!(
                "sysinfo does not support {}",
                std::env::consts::OS
            )));
        }
        // Baseline, then measure over the window. Network counters from the baseline
        // refresh are discarded; only the second refresh's deltas count.
        self.refresh()?;
        std::thread::sleep(self.window);
        self.refresh()?;

        let mem_total = self.sys.total_memory();
        check_readable(mem_total, self.sys.processes().len())?;
        let mem_used = mem_total.saturating_sub(self.sys.available_memory());
        let mem_percent = (mem_used as f64 / mem_total as f64 * 100.0) as f32;

        // A process whose counters could not be read surfaces as a non-finite value.
        let busy_process_count = count_busy_processes(
            self.sys
                .processes()
                .values()
                .map(|p| Some(p.cpu_usage()).filter(|c| c.is_finite())),
            self.busy_cpu_percent,
        );

        let (mut sent, mut recv) = (0u64, 0u64);
        for (_name, data) in self.nets.iter() {
            sent = sent.saturating_add(data.transmitted());
            recv = recv.saturating_add(data.received());
        }

        let snapshot = LoadSnapshot {
            cpu_percent: self.sys.global_cpu_usage(),
            mem_percent,
            busy_process_count,
            net_bytes_sent: sent,
            net_bytes_recv: recv,
        };
        debug!(?snapshot, "load sampled");
        Ok(snapshot)
    }
}

/// A zero memory total or an empty process table means the OS hid the data from us
/// (no /proc, sandbox), not that the machine is idle. The agent itself is always a process.
fn check_readable(mem_total: u64, process_count: usize) -> Result<(), ProbeError> {
    if mem_total == 0 {
        return Err(ProbeError::NoMemoryInfo);
    }
    if process_count == 0 {
        return Err(ProbeError::Unavailable("process table is empty".into()));
    }
    Ok(())
}
