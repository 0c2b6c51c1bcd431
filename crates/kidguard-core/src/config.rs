use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the local data directory for kidguard.
///
/// # Errors
///
/// Returns an error if the local data directory cannot be determined.
pub fn get_data_dir() -> Result<PathBuf> {
    let mut path =
        dirs::data_local_dir().ok_or_else(|| anyhow::anyhow!("Failed to get local data dir"))?;
    path.push("kidguard");
    Ok(path)
}

/// Runtime configuration, read from `<data_dir>/config.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sensing: SensingConfig,
    pub classifier: ClassifierConfig,
    pub monitor: MonitorConfig,
    pub telemetry: TelemetryConfig,
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensingConfig {
    /// Delay between samples of one sensor (the platform "normal" rate)
    pub sampling_interval_ms: u64,
    /// Per-kind buffer cap; the oldest sample is dropped on overflow
    pub max_samples_per_kind: usize,
    /// JSON-lines file of recorded sensor events to replay as the sensor source
    pub replay_path: Option<PathBuf>,
}

impl Default for SensingConfig {
    fn default() -> Self {
        Self {
            sampling_interval_ms: 200,
            max_samples_per_kind: 100_000,
            replay_path: None,
        }
    }
}

impl SensingConfig {
    #[must_use]
    pub fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Model artifact; defaults to `<data_dir>/model.json`
    pub model_path: Option<PathBuf>,
}

impl ClassifierConfig {
    /// # Errors
    ///
    /// Returns an error if no path is configured and the data directory is unknown
    pub fn resolved_model_path(&self) -> Result<PathBuf> {
        match &self.model_path {
            Some(path) => Ok(path.clone()),
            None => Ok(get_data_dir()?.join("model.json")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_ms: u64,
    /// Applications denied while restricted mode is on
    pub blocked_apps: Vec<String>,
    /// Command run to push a blocked app out of the foreground; `{app}` is substituted
    pub deny_command: Option<Vec<String>>,
    /// Command run to show the block notice; `{message}` is substituted
    pub notice_command: Option<Vec<String>>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            blocked_apps: vec![
                String::from("com.linkedin.android"),
                String::from("com.example.datacollection"),
                String::from("com.facebook.katana"),
                String::from("com.google.android.youtube"),
            ],
            deny_command: None,
            notice_command: None,
        }
    }
}

impl MonitorConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetrySinkKind {
    #[default]
    Jsonl,
    Http,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub sink: TelemetrySinkKind,
    /// Collection endpoint for the HTTP sink
    pub endpoint: Option<String>,
    /// Output file for the JSON-lines sink; defaults to `<data_dir>/sensor_data.jsonl`
    pub path: Option<PathBuf>,
    /// Per-request timeout of the HTTP sink
    pub request_timeout_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            sink: TelemetrySinkKind::default(),
            endpoint: None,
            path: None,
            request_timeout_secs: 30,
        }
    }
}

impl TelemetryConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Upper bound on the teardown flush of an active session
    pub flush_timeout_secs: u64,
    pub feature_queue_capacity: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            flush_timeout_secs: 5,
            feature_queue_capacity: 16,
        }
    }
}

impl DaemonConfig {
    #[must_use]
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_secs(self.flush_timeout_secs)
    }
}

impl Config {
    /// Default config file location
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be determined
    pub fn default_path() -> Result<PathBuf> {
        Ok(get_data_dir()?.join("config.toml"))
    }

    /// Load the config file, falling back to defaults when it does not exist
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Write the config file, creating its directory if needed
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let raw = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, raw)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.sensing.sampling_interval_ms, 200);
        assert_eq!(config.monitor.poll_interval_ms, 100);
        assert_eq!(config.telemetry.sink, TelemetrySinkKind::Jsonl);
        assert!(config
            .monitor
            .blocked_apps
            .contains(&String::from("com.google.android.youtube")));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[monitor]\nblocked_apps = [\"com.a\"]\n\n[telemetry]\nsink = \"none\"\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.monitor.blocked_apps, vec![String::from("com.a")]);
        assert_eq!(config.monitor.poll_interval_ms, 100);
        assert_eq!(config.telemetry.sink, TelemetrySinkKind::None);
        assert_eq!(config.telemetry.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.daemon.flush_timeout_secs, 5);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.sensing.max_samples_per_kind = 42;
        config.save(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.sensing.max_samples_per_kind, 42);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[sensing\n").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }
}
