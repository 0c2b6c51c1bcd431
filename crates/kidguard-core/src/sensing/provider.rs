use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{SensorKind, SessionRecorder};
use crate::config::SensingConfig;

/// One reading as delivered by a sensor source, before it is stamped into a session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorEvent {
    pub kind: SensorKind,
    pub values: [f32; 3],
}

/// Sensor subsystem trait for platform-specific implementations
///
/// Registered sources deliver events to the recorder from their own
/// dispatch context until [`SensorProvider::unregister_all`] is called.
pub trait SensorProvider: Send + Sync {
    /// Subscribe to `kind` at the given cadence, delivering into `sink`
    ///
    /// # Errors
    ///
    /// Returns an error if the sensor is unavailable
    fn register(
        &mut self,
        kind: SensorKind,
        interval: Duration,
        sink: Arc<SessionRecorder>,
    ) -> Result<()>;

    /// Drop every subscription
    fn unregister_all(&mut self);

    fn name(&self) -> &'static str;
}

/// Create the sensor provider selected by configuration
///
/// # Errors
///
/// Returns an error if the configured replay file cannot be read
pub fn create_provider(config: &SensingConfig) -> Result<Box<dyn SensorProvider>> {
    match &config.replay_path {
        Some(path) => Ok(Box::new(ReplayProvider::from_file(path)?)),
        None => Ok(Box::new(NullProvider)),
    }
}

/// Provider for hosts without motion sensors
pub struct NullProvider;

impl SensorProvider for NullProvider {
    fn register(
        &mut self,
        kind: SensorKind,
        _interval: Duration,
        _sink: Arc<SessionRecorder>,
    ) -> Result<()> {
        log::warn!("No {} sensor on this host; session will record no samples", kind.display_name());
        Ok(())
    }

    fn unregister_all(&mut self) {}

    fn name(&self) -> &'static str {
        "null"
    }
}

/// Replays recorded sensor events at the sampling cadence, looping at the end
pub struct ReplayProvider {
    events: Vec<SensorEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl ReplayProvider {
    #[must_use]
    pub fn new(events: Vec<SensorEvent>) -> Self {
        Self {
            events,
            tasks: Vec::new(),
        }
    }

    /// Load events from a JSON-lines file, one [`SensorEvent`] per line
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a line is malformed
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay file {}", path.display()))?;
        let events = raw
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str::<SensorEvent>(line)
                    .with_context(|| format!("Malformed replay line {}", n + 1))
            })
            .collect::<Result<Vec<_>>>()?;
        log::info!("Loaded {} replay events from {}", events.len(), path.display());
        Ok(Self::new(events))
    }
}

impl SensorProvider for ReplayProvider {
    fn register(
        &mut self,
        kind: SensorKind,
        interval: Duration,
        sink: Arc<SessionRecorder>,
    ) -> Result<()> {
        let values: Vec<[f32; 3]> = self
            .events
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.values)
            .collect();

        if values.is_empty() {
            log::warn!("Replay has no {} events", kind.display_name());
            return Ok(());
        }

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            for v in values.iter().cycle() {
                ticker.tick().await;
                sink.push(kind, *v);
            }
        });
        self.tasks.push(task);
        log::debug!("Registered replay source for {}", kind.display_name());
        Ok(())
    }

    fn unregister_all(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    fn name(&self) -> &'static str {
        "replay"
    }
}

impl Drop for ReplayProvider {
    fn drop(&mut self) {
        self.unregister_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_file_parses_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.jsonl");
        std::fs::write(
            &path,
            "{\"kind\":\"LinearAcceleration\",\"values\":[0.1,0.2,0.3]}\n\n{\"kind\":\"RotationVector\",\"values\":[1.0,0.0,0.0]}\n",
        )
        .unwrap();

        let provider = ReplayProvider::from_file(&path).unwrap();
        assert_eq!(provider.events.len(), 2);
        assert_eq!(provider.events[1].kind, SensorKind::RotationVector);
    }

    #[test]
    fn test_from_file_reports_bad_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.jsonl");
        std::fs::write(&path, "{\"kind\":\"Gyroscope\",\"values\":[0,0,0]}\n").unwrap();

        let err = ReplayProvider::from_file(&path).err().unwrap();
        assert!(err.to_string().contains("line 1"));
    }

    #[tokio::test]
    async fn test_replay_feeds_active_session() {
        let recorder = Arc::new(SessionRecorder::new(1000));
        recorder.start("alice").unwrap();

        let mut provider = ReplayProvider::new(vec![SensorEvent {
            kind: SensorKind::LinearAcceleration,
            values: [0.5, 0.5, 0.5],
        }]);
        provider
            .register(
                SensorKind::LinearAcceleration,
                Duration::from_millis(5),
                Arc::clone(&recorder),
            )
            .unwrap();
        provider
            .register(
                SensorKind::RotationVector,
                Duration::from_millis(5),
                Arc::clone(&recorder),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        provider.unregister_all();

        let snapshot = recorder.stop_active().unwrap();
        assert!(!snapshot.samples.get(SensorKind::LinearAcceleration).is_empty());
        assert!(snapshot.samples.get(SensorKind::RotationVector).is_empty());
    }
}
