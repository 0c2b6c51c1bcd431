//! Enforcement monitor process commands
//!
//! The monitor runs separately from the recording daemon and only shares the
//! policy database with it.

use anyhow::Result;
use clap::Subcommand;
use std::path::Path;
use std::sync::Arc;
use sysinfo::{Pid, Signal, System};
use kidguard_core::{
    config::Config,
    monitor::{create_observer, CommandEnforcer, EnforcementMonitor},
    DaemonControl, PolicyStore,
};
use kidguard_storage::Database;

use super::daemon::{force_kill, spawn_background, wait_for_exit};
use super::helpers::{is_process_running, setup_file_logging};

#[derive(Subcommand, Debug)]
pub enum MonitorAction {
    /// Run the enforcement monitor in the foreground
    Run,
    /// Start the enforcement monitor in the background
    Start,
    /// Stop the background enforcement monitor
    Stop,
    /// Show whether the enforcement monitor is running
    Status,
}

/// Handle monitor commands
pub async fn handle_monitor_command(
    action: MonitorAction,
    data_dir: &Path,
    config_path: Option<&Path>,
) -> Result<()> {
    match action {
        MonitorAction::Run => run_monitor(config_path).await,
        MonitorAction::Start => start_monitor(data_dir, config_path),
        MonitorAction::Stop => stop_monitor(data_dir),
        MonitorAction::Status => {
            match DaemonControl::monitor(data_dir).get_pid()? {
                Some(pid) if is_process_running(pid) => {
                    println!("Monitor Status: Running (PID: {pid})");
                }
                _ => println!("Monitor Status: Not running"),
            }
            Ok(())
        }
    }
}

async fn run_monitor(config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;
    let policy = PolicyStore::new(
        Arc::new(Database::new(None)?),
        config.monitor.blocked_apps.iter().cloned().collect(),
    );

    let mut monitor = EnforcementMonitor::new(
        create_observer()?,
        Box::new(CommandEnforcer::from_config(&config.monitor)),
        policy,
        config.monitor.poll_interval(),
    );
    monitor.run().await;
    Ok(())
}

fn start_monitor(data_dir: &Path, config_path: Option<&Path>) -> Result<()> {
    let control = DaemonControl::monitor(data_dir);
    log::info!("Starting kidguard enforcement monitor...");
    if let Some(pid) = spawn_background(&control, "monitor-internal-start", config_path)? {
        log::info!("Monitor process started with PID: {pid}");
    }
    Ok(())
}

/// Entry point of the detached monitor process
pub async fn run_monitor_process(config_path: Option<&Path>) -> Result<()> {
    if let Err(e) = setup_file_logging("monitor.log") {
        eprintln!("Failed to set up monitor logging: {e}");
        return Err(e);
    }
    log::info!("Monitor process started internally.");

    if let Err(e) = run_monitor(config_path).await {
        log::error!("Monitor exited with a fatal error: {e:#}");
        return Err(e);
    }
    Ok(())
}

fn stop_monitor(data_dir: &Path) -> Result<()> {
    let control = DaemonControl::monitor(data_dir);
    let Some(pid) = control.get_pid()? else {
        log::info!("Monitor is not running (no PID file).");
        return Ok(());
    };

    log::info!("Stopping enforcement monitor (PID: {pid})...");
    let mut sys = System::new();
    let sys_pid = Pid::from_u32(pid);
    let signalled = sys.refresh_process(sys_pid)
        && sys
            .process(sys_pid)
            .and_then(|process| process.kill_with(Signal::Term))
            .unwrap_or(false);

    if signalled && wait_for_exit(pid, 6) {
        log::info!("Monitor stopped successfully.");
    } else if is_process_running(pid) {
        log::warn!("Monitor did not stop gracefully. Force killing...");
        force_kill(pid);
    }

    control.remove_pid()
}
