use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{SensorKind, SensorProvider, SessionHandle, SessionRecorder, SessionSnapshot};
use crate::pipeline::FeatureMessage;
use crate::telemetry::{deliver_snapshot, TelemetrySink};

/// What a stop produced, reported back to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub owner: String,
    pub linear_acceleration_samples: usize,
    pub rotation_vector_samples: usize,
    pub dropped: u64,
}

impl SessionSummary {
    fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        Self {
            session_id: snapshot.id,
            owner: snapshot.owner.clone(),
            linear_acceleration_samples: snapshot.samples.get(SensorKind::LinearAcceleration).len(),
            rotation_vector_samples: snapshot.samples.get(SensorKind::RotationVector).len(),
            dropped: snapshot.dropped,
        }
    }
}

/// Owns the sensor subscriptions for the recording session and hands sealed
/// sessions to telemetry and the classification pipeline
pub struct SessionController {
    recorder: Arc<SessionRecorder>,
    provider: Mutex<Box<dyn SensorProvider>>,
    telemetry: Arc<dyn TelemetrySink>,
    features_tx: mpsc::Sender<FeatureMessage>,
    sampling_interval: Duration,
    handoffs: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionController {
    #[must_use]
    pub fn new(
        recorder: Arc<SessionRecorder>,
        provider: Box<dyn SensorProvider>,
        telemetry: Arc<dyn TelemetrySink>,
        features_tx: mpsc::Sender<FeatureMessage>,
        sampling_interval: Duration,
    ) -> Self {
        Self {
            recorder,
            provider: Mutex::new(provider),
            telemetry,
            features_tx,
            sampling_interval,
            handoffs: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn recorder(&self) -> &Arc<SessionRecorder> {
        &self.recorder
    }

    /// Start recording for `owner` and subscribe to every sensor kind
    ///
    /// # Errors
    ///
    /// Returns a [`super::SessionError`] if the owner is empty or a session is
    /// already active, or the provider's error if a sensor cannot be
    /// registered. In the latter case the new session is discarded.
    pub async fn start_session(&self, owner: &str) -> Result<SessionHandle> {
        let handle = self.recorder.start(owner)?;

        let mut provider = self.provider.lock().await;
        for kind in SensorKind::ALL {
            if let Err(e) =
                provider.register(kind, self.sampling_interval, Arc::clone(&self.recorder))
            {
                provider.unregister_all();
                self.recorder.stop(&handle);
                return Err(e.context(format!(
                    "Failed to register {} sensor",
                    kind.display_name()
                )));
            }
        }
        log::info!(
            "Session {} recording via {} provider",
            handle.id(),
            provider.name()
        );
        Ok(handle)
    }

    /// Stop the active session, if any, and hand it off
    ///
    /// Returns as soon as the session is sealed; telemetry delivery and
    /// classification continue in the background. Stopping with no active
    /// session returns `None`.
    pub async fn stop_session(&self) -> Option<SessionSummary> {
        self.provider.lock().await.unregister_all();

        let snapshot = Arc::new(self.recorder.stop_active()?);
        let summary = SessionSummary::from_snapshot(&snapshot);

        let telemetry = Arc::clone(&self.telemetry);
        let for_telemetry = Arc::clone(&snapshot);
        let telemetry_task = tokio::spawn(async move {
            deliver_snapshot(telemetry.as_ref(), &for_telemetry).await;
        });

        let features_tx = self.features_tx.clone();
        let classify_task = tokio::spawn(async move {
            let message = FeatureMessage::from_snapshot(&snapshot);
            if features_tx.send(message).await.is_err() {
                log::warn!(
                    "Classification pipeline is gone; features for session {} dropped",
                    snapshot.id
                );
            }
        });

        let mut handoffs = self.handoffs.lock().await;
        handoffs.retain(|h| !h.is_finished());
        handoffs.push(telemetry_task);
        handoffs.push(classify_task);

        Some(summary)
    }

    /// Stop any active session and wait, up to `flush_timeout`, for pending
    /// hand-offs to finish
    pub async fn shutdown(&self, flush_timeout: Duration) {
        if let Some(summary) = self.stop_session().await {
            log::info!("Flushed active session {} on shutdown", summary.session_id);
        }

        let pending: Vec<JoinHandle<()>> = self.handoffs.lock().await.drain(..).collect();
        if pending.is_empty() {
            return;
        }

        let count = pending.len();
        let drained = tokio::time::timeout(flush_timeout, async move {
            for handle in pending {
                if let Err(e) = handle.await {
                    log::warn!("Session hand-off task failed: {e}");
                }
            }
        })
        .await;

        if drained.is_err() {
            log::warn!("Gave up on {count} pending hand-off tasks after {flush_timeout:?}");
        }
    }
}
