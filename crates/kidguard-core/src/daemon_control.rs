use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// PID file bookkeeping for the background processes
pub struct DaemonControl {
    pid_file: PathBuf,
}

impl DaemonControl {
    /// PID file of the recording daemon
    #[must_use]
    pub fn daemon(data_dir: &Path) -> Self {
        Self {
            pid_file: data_dir.join("kidguard.pid"),
        }
    }

    /// PID file of the enforcement monitor
    #[must_use]
    pub fn monitor(data_dir: &Path) -> Self {
        Self {
            pid_file: data_dir.join("monitor.pid"),
        }
    }

    #[must_use]
    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    /// Get the recorded PID, if any
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed
    pub fn get_pid(&self) -> Result<Option<u32>> {
        if !self.pid_file.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.pid_file)
            .with_context(|| format!("Failed to read {}", self.pid_file.display()))?;
        let pid = contents
            .trim()
            .parse::<u32>()
            .with_context(|| format!("Corrupt PID file {}", self.pid_file.display()))?;
        Ok(Some(pid))
    }

    /// # Errors
    ///
    /// Returns an error if the file cannot be written
    pub fn write_pid(&self, pid: u32) -> Result<()> {
        if let Some(parent) = self.pid_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.pid_file, pid.to_string())
            .with_context(|| format!("Failed to write {}", self.pid_file.display()))
    }

    /// Remove PID file
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists and cannot be removed
    pub fn remove_pid(&self) -> Result<()> {
        if self.pid_file.exists() {
            std::fs::remove_file(&self.pid_file)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_round_trip_and_removal() {
        let dir = tempfile::tempdir().unwrap();
        let control = DaemonControl::monitor(dir.path());
        assert_eq!(control.get_pid().unwrap(), None);

        control.write_pid(4242).unwrap();
        assert_eq!(control.get_pid().unwrap(), Some(4242));

        control.remove_pid().unwrap();
        assert_eq!(control.get_pid().unwrap(), None);
        control.remove_pid().unwrap();
    }

    #[test]
    fn test_corrupt_pid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let control = DaemonControl::daemon(dir.path());
        std::fs::write(control.pid_file(), "not-a-pid").unwrap();
        assert!(control.get_pid().is_err());
    }
}
