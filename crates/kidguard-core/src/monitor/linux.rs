use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use super::ForegroundAppObserver;

/// Resolves the focused X11 window to its process name via `xdotool`
#[derive(Default)]
pub struct LinuxObserver;

impl LinuxObserver {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    async fn active_window_pid() -> Result<Option<u32>> {
        let output = Command::new("xdotool")
            .args(["getactivewindow", "getwindowpid"])
            .output()
            .await
            .context("Failed to run xdotool")?;

        if !output.status.success() {
            // No focused window (e.g. bare desktop)
            return Ok(None);
        }

        let pid = String::from_utf8_lossy(&output.stdout).trim().parse::<u32>().ok();
        Ok(pid)
    }
}

#[async_trait]
impl ForegroundAppObserver for LinuxObserver {
    async fn foreground_app(&self) -> Result<Option<String>> {
        let Some(pid) = Self::active_window_pid().await? else {
            return Ok(None);
        };

        match tokio::fs::read_to_string(format!("/proc/{pid}/comm")).await {
            Ok(comm) => Ok(parse_comm(&comm)),
            Err(e) => {
                log::debug!("Foreground process {pid} vanished: {e}");
                Ok(None)
            }
        }
    }

    fn name(&self) -> &'static str {
        "xdotool"
    }
}

fn parse_comm(raw: &str) -> Option<String> {
    let name = raw.trim();
    (!name.is_empty()).then(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_comm() {
        assert_eq!(parse_comm("firefox\n"), Some(String::from("firefox")));
        assert_eq!(parse_comm("  \n"), None);
    }
}
