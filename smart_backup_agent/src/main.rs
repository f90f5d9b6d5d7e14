//! Entry point for smart_backup_agent. Parses args, then runs one check or the monitor loop.

use anyhow::Context;
use smart_backup_agent::config::{parse_args, usage, Config};
use smart_backup_agent::logging;
use smart_backup_agent::monitor::{BackupAgent, MonitorLoop};
use smart_backup_agent::probe::SysinfoProbe;
use std::env;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = match parse_args(env::args_os())? {
        Some(a) => a,
        None => {
            let prog = env::args_os()
                .next()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|| "smart_backup_agent".into());
            println!("{}", usage(&prog));
            return Ok(());
        }
    };
    let cfg = Config::resolve(&args)?;

    std::fs::create_dir_all(&cfg.backup_root)
        .with_context(|| format!("cannot create backup root {}", cfg.backup_root.display()))?;
    let _log_guard = logging::init(&cfg.log_file()).context("cannot initialise logging")?;

    info!(
        "source {}, backups in {}, live mirror {}",
        cfg.source_dir.display(),
        cfg.backup_root.display(),
        cfg.mirror_dir.display()
    );

    let probe = SysinfoProbe::new(cfg.sample_window, cfg.thresholds.busy_process_cpu_percent);
    let agent = BackupAgent::new(&cfg, Box::new(probe));
    let monitor = MonitorLoop::new(agent, cfg.poll_period, cfg.cooldown);

    if !args.monitor {
        if let Err(e) = monitor.run_once().await {
            error!("backup check failed: {e}");
        }
        return Ok(());
    }

    // Install the Ctrl-C handler up front so a signal mid-cycle lets the cycle finish.
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, stopping after the current cycle");
                let _ = stop_tx.send(());
            }
            Err(e) => {
                error!("cannot listen for interrupt: {e}");
                // hold the sender so the loop keeps running
                std::future::pending::<()>().await;
                drop(stop_tx);
            }
        }
    });
    info!(
        "minimum interval between backups: {:.1}h",
        cfg.min_interval.as_secs_f64() / 3600.0
    );
    monitor
        .run(async move {
            let _ = stop_rx.await;
        })
        .await;
    Ok(())
}
