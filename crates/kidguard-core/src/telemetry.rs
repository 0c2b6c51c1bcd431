//! Write-only telemetry of raw sensor samples.
//!
//! Delivery is best effort: every failure is logged and dropped, and nothing
//! here is ever awaited on the classification path.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::config::{get_data_dir, TelemetryConfig, TelemetrySinkKind};
use crate::sensing::{RawSample, SessionSnapshot};

/// One raw sample as submitted to the sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub sensor: String,
    pub username: String,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// `YYYY-MM-DD HH:MM:SS` in UTC
    pub timestamp: String,
}

impl TelemetryRecord {
    #[must_use]
    pub fn from_sample(owner: &str, sample: &RawSample) -> Self {
        let [x, y, z] = sample.components();
        Self {
            sensor: sample.kind().display_name().to_string(),
            username: owner.to_string(),
            x,
            y,
            z,
            timestamp: sample.wall_time().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// Telemetry destination
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Submit one record
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be delivered
    async fn submit(&self, record: &TelemetryRecord) -> Result<()>;

    /// Get the sink name
    fn name(&self) -> &'static str;
}

/// Outcome of delivering one session's samples
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub submitted: usize,
    pub failed: usize,
}

impl DeliveryReport {
    pub fn record_success(&mut self) {
        self.submitted += 1;
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }
}

/// Submit every sample of a sealed session, logging and dropping failures
pub async fn deliver_snapshot(sink: &dyn TelemetrySink, snapshot: &SessionSnapshot) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    for sample in snapshot.samples.iter() {
        let record = TelemetryRecord::from_sample(&snapshot.owner, sample);
        match sink.submit(&record).await {
            Ok(()) => report.record_success(),
            Err(e) => {
                if report.failed == 0 {
                    log::warn!("Telemetry ({}) submit failed: {e:#}", sink.name());
                }
                report.record_failure();
            }
        }
    }

    if report.failed > 0 {
        log::warn!(
            "Telemetry ({}) dropped {} of {} samples for session {}",
            sink.name(),
            report.failed,
            report.failed + report.submitted,
            snapshot.id
        );
    } else {
        log::info!(
            "Telemetry ({}) delivered {} samples for session {}",
            sink.name(),
            report.submitted,
            snapshot.id
        );
    }
    report
}

/// Create the sink selected by configuration
///
/// # Errors
///
/// Returns an error if the HTTP sink has no endpoint or its client cannot be
/// built, or if the data directory is unknown
pub fn create_sink(config: &TelemetryConfig) -> Result<Arc<dyn TelemetrySink>> {
    match config.sink {
        TelemetrySinkKind::Jsonl => {
            let path = match &config.path {
                Some(p) => p.clone(),
                None => get_data_dir()?.join("sensor_data.jsonl"),
            };
            Ok(Arc::new(JsonlTelemetrySink::new(path)))
        }
        TelemetrySinkKind::Http => {
            let endpoint = config
                .endpoint
                .clone()
                .context("telemetry.endpoint is required for the http sink")?;
            Ok(Arc::new(HttpTelemetrySink::new(
                endpoint,
                config.request_timeout(),
            )?))
        }
        TelemetrySinkKind::None => Ok(Arc::new(NullTelemetrySink)),
    }
}

/// Appends one JSON object per line to a local file
pub struct JsonlTelemetrySink {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl JsonlTelemetrySink {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: Mutex::new(None),
        }
    }
}

#[async_trait]
impl TelemetrySink for JsonlTelemetrySink {
    async fn submit(&self, record: &TelemetryRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut guard = self.file.lock().await;
        if guard.is_none() {
            if let Some(parent) = self.path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .with_context(|| format!("Failed to open {}", self.path.display()))?;
            *guard = Some(file);
        }

        if let Some(file) = guard.as_mut() {
            file.write_all(&line).await?;
            file.flush().await?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "jsonl"
    }
}

/// POSTs each record as JSON to a collection endpoint
pub struct HttpTelemetrySink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTelemetrySink {
    /// Create a sink whose requests give up after `timeout`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build telemetry HTTP client")?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl TelemetrySink for HttpTelemetrySink {
    async fn submit(&self, record: &TelemetryRecord) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(record)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Telemetry endpoint error ({status}): {error_text}");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Discards everything
pub struct NullTelemetrySink;

#[async_trait]
impl TelemetrySink for NullTelemetrySink {
    async fn submit(&self, _record: &TelemetryRecord) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensing::{SensorKind, SessionRecorder};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakySink {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TelemetrySink for FlakySink {
        async fn submit(&self, _record: &TelemetryRecord) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 0 {
                anyhow::bail!("network unreachable");
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    fn snapshot_with(samples: usize) -> SessionSnapshot {
        let recorder = SessionRecorder::new(1000);
        recorder.start("alice").unwrap();
        for i in 0..samples {
            let kind = if i % 2 == 0 {
                SensorKind::LinearAcceleration
            } else {
                SensorKind::RotationVector
            };
            recorder.push(kind, [0.1, 0.2, 0.3]);
        }
        recorder.stop_active().unwrap()
    }

    #[test]
    fn test_record_fields() {
        let snapshot = snapshot_with(1);
        let sample = snapshot.samples.iter().next().unwrap();
        let record = TelemetryRecord::from_sample("alice", sample);
        assert_eq!(record.sensor, "Linear Acceleration");
        assert_eq!(record.username, "alice");
        assert!((record.z - 0.3).abs() < f32::EPSILON);
        assert_eq!(record.timestamp.len(), "2024-01-01 00:00:00".len());
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_raised() {
        let sink = FlakySink {
            calls: AtomicUsize::new(0),
        };
        let report = deliver_snapshot(&sink, &snapshot_with(4)).await;
        assert_eq!(report, DeliveryReport { submitted: 2, failed: 2 });
    }

    #[tokio::test]
    async fn test_jsonl_sink_writes_one_line_per_sample() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("sensor_data.jsonl");
        let sink = JsonlTelemetrySink::new(path.clone());

        let report = deliver_snapshot(&sink, &snapshot_with(3)).await;
        assert_eq!(report.submitted, 3);

        let content = std::fs::read_to_string(&path).unwrap();
        let records: Vec<TelemetryRecord> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].sensor, "Rotation Vector");
    }

    #[test]
    fn test_http_sink_requires_endpoint() {
        let config = TelemetryConfig {
            sink: TelemetrySinkKind::Http,
            endpoint: None,
            ..TelemetryConfig::default()
        };
        assert!(create_sink(&config).is_err());
    }

    #[tokio::test]
    async fn test_http_submit_gives_up_on_silent_endpoint() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept and hold connections without ever answering
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let sink = HttpTelemetrySink::new(format!("http://{addr}/samples"), Duration::from_millis(200))
            .unwrap();
        let snapshot = snapshot_with(1);
        let record = TelemetryRecord::from_sample("alice", snapshot.samples.iter().next().unwrap());

        let outcome = tokio::time::timeout(Duration::from_secs(5), sink.submit(&record)).await;
        assert!(matches!(outcome, Ok(Err(_))), "submit should fail with a timeout");
        server.abort();
    }
}
