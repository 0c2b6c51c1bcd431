//! Helper utility functions for CLI commands

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use kidguard_core::config::get_data_dir;
use sysinfo::{Pid, System};

/// Route all logging of a background process into `<data_dir>/<file_name>`
///
/// # Errors
///
/// Returns an error if the log file cannot be opened
pub fn setup_file_logging(file_name: &str) -> Result<()> {
    use std::fs::{create_dir_all, OpenOptions};

    let log_path = get_data_dir()?.join(file_name);

    if let Some(parent) = log_path.parent() {
        create_dir_all(parent)?;
    }

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .format_timestamp_millis()
        .init();

    Ok(())
}

/// Whether a process with this PID exists
#[must_use]
pub fn is_process_running(pid: u32) -> bool {
    let mut sys = System::new();
    sys.refresh_process(Pid::from_u32(pid))
}

/// Probability of the adult class as a percentage
#[must_use]
pub fn format_probability(probability: f32) -> String {
    format!("{:.1}%", probability * 100.0)
}

/// Local wall-clock rendering of a stored timestamp
#[must_use]
pub fn format_local(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}
