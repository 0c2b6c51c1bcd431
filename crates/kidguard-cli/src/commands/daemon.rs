//! Daemon lifecycle management commands

use anyhow::Result;
use std::{
    env, fs,
    path::{Path, PathBuf},
    process::Command,
    thread::sleep,
    time,
};
use sysinfo::{Pid, System};
use kidguard_core::{
    config::Config,
    ipc::{IpcClient, IpcRequest, IpcResponse},
    Daemon, DaemonControl,
};
use kidguard_storage::Database;

use super::helpers::{format_local, format_probability, is_process_running, setup_file_logging};

pub fn socket_path(data_dir: &Path) -> PathBuf {
    data_dir.join("kidguard.sock")
}

/// Spawn `current_exe <internal_command>` detached and record its PID
///
/// # Errors
///
/// Returns an error if the process cannot be spawned or its PID recorded
pub fn spawn_background(
    control: &DaemonControl,
    internal_command: &str,
    config_path: Option<&Path>,
) -> Result<Option<u32>> {
    // 1. Check if it is already running
    match control.get_pid() {
        Ok(Some(pid)) if is_process_running(pid) => {
            log::info!("Already running (PID: {pid}).");
            return Ok(None);
        }
        Ok(Some(_)) | Err(_) => {
            log::warn!("Removing stale PID file.");
            control.remove_pid()?;
        }
        Ok(None) => {}
    }

    // 2. Spawn a new process
    let current_exe = env::current_exe()?;
    let current_dir = env::current_dir()?;
    let mut command = Command::new(current_exe);
    if let Some(path) = config_path {
        command.arg("--config").arg(path);
    }
    let child = command
        .arg(internal_command)
        .current_dir(current_dir)
        .spawn()?;

    // 3. In parent process, write PID and exit
    control.write_pid(child.id())?;
    Ok(Some(child.id()))
}

pub fn start_daemon(data_dir: &Path, config_path: Option<&Path>) -> Result<()> {
    let sock_path = socket_path(data_dir);
    let control = DaemonControl::daemon(data_dir);

    if matches!(control.get_pid(), Ok(Some(pid)) if is_process_running(pid)) {
        log::info!("Daemon is already running.");
        return Ok(());
    }

    // Clean up old socket if it exists
    if sock_path.exists() {
        log::warn!("Removing stale socket file.");
        fs::remove_file(&sock_path)?;
    }

    log::info!("Starting kidguard daemon...");
    if let Some(pid) = spawn_background(&control, "daemon-internal-start", config_path)? {
        log::info!("Daemon process started with PID: {pid}");
    }
    Ok(())
}

pub async fn run_daemon_process(config_path: Option<&Path>) -> Result<()> {
    // This is the detached daemon process
    // We must set up logging here, as this is a new process.
    if let Err(e) = setup_file_logging("kidguard.log") {
        eprintln!("Failed to set up daemon logging: {e}");
        return Err(e);
    }
    log::info!("Daemon process started internally.");

    if let Err(e) = daemon_main_logic(config_path).await {
        log::error!("Daemon main logic exited with a fatal error: {e:#}");
        return Err(e);
    }

    Ok(())
}

async fn daemon_main_logic(config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;
    let db = Database::new(None)?;
    let daemon = Daemon::new(&config, db)?;
    daemon.run_with_signals().await
}

pub async fn stop_daemon(data_dir: &Path) -> Result<()> {
    let control = DaemonControl::daemon(data_dir);
    let sock_path = socket_path(data_dir);

    let Some(pid) = control.get_pid()? else {
        log::info!("Daemon is not running (no PID file).");
        // Also remove socket if it exists for consistency
        if sock_path.exists() {
            fs::remove_file(&sock_path)?;
        }
        return Ok(());
    };

    log::info!("Stopping kidguard daemon (PID: {pid})...");
    let client = IpcClient::new(&sock_path);

    match client.send_command(IpcRequest::Shutdown).await {
        Ok(IpcResponse::Shutdown) => {
            log::info!("Daemon shutdown signal sent. Waiting for process to exit...");
            if wait_for_exit(pid, 24) {
                log::info!("Daemon stopped successfully.");
            } else {
                log::warn!("Daemon did not stop gracefully. Force killing...");
                force_kill(pid);
            }
        }
        Ok(resp) => log::error!("Received unexpected response from daemon: {resp:?}"),
        Err(e) => {
            log::error!("Failed to send shutdown command: {e}. Forcing cleanup.");
            force_kill(pid);
        }
    }

    // Cleanup
    control.remove_pid()?;
    if sock_path.exists() {
        fs::remove_file(&sock_path)?;
    }

    Ok(())
}

/// Poll every 500 ms until `pid` is gone; `false` if it outlived the budget
pub fn wait_for_exit(pid: u32, attempts: u32) -> bool {
    for _ in 0..attempts {
        if !is_process_running(pid) {
            return true;
        }
        sleep(time::Duration::from_millis(500));
    }
    !is_process_running(pid)
}

pub fn force_kill(pid: u32) {
    let mut sys = System::new();
    let pid = Pid::from_u32(pid);
    if sys.refresh_process(pid) {
        if let Some(process) = sys.process(pid) {
            process.kill();
            log::info!("Process killed.");
        }
    }
}

pub async fn show_status(data_dir: &Path) -> Result<()> {
    let sock_path = socket_path(data_dir);

    if !sock_path.exists() {
        println!("Daemon Status: Not running");
        return show_stored_policy();
    }

    let client = IpcClient::new(&sock_path);
    match client.send_command(IpcRequest::Status).await {
        Ok(IpcResponse::Status(status)) => {
            println!("Daemon Status: Running");
            println!(
                "Classifier: {}",
                if status.classifier_ready {
                    "loaded"
                } else {
                    "unavailable (sensing only)"
                }
            );

            println!("\nRecording:");
            match status.active_session {
                Some(session) => {
                    println!("  Session: {} ({})", session.session_id, session.owner);
                    println!(
                        "  Samples: {} linear acceleration, {} rotation vector",
                        session.linear_acceleration_samples, session.rotation_vector_samples
                    );
                }
                None => println!("  No active session"),
            }

            println!("\nPolicy:");
            println!(
                "  Restricted mode: {}",
                if status.restricted_mode { "ON" } else { "off" }
            );
            if let Some(result) = status.latest_result {
                println!(
                    "  Last classification: {} (p={}) at {}",
                    result.label(),
                    format_probability(result.probability()),
                    format_local(result.decided_at())
                );
            }
        }
        Ok(IpcResponse::Error(message)) => anyhow::bail!("Daemon error: {message}"),
        Ok(_) => anyhow::bail!("Unexpected response from daemon"),
        Err(e) => {
            log::error!("Failed to get status: {e}");
            println!("Daemon Status: Not running (or not responding)");
            show_stored_policy()?;
        }
    }
    Ok(())
}

fn show_stored_policy() -> Result<()> {
    let db = Database::new(None)?;
    let record = db.get_policy_record()?;
    println!(
        "Restricted mode (stored): {}",
        if record.restricted_mode { "ON" } else { "off" }
    );
    Ok(())
}
