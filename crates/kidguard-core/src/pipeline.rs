//! Classification pipeline: feature messages in, committed policy out.

use anyhow::Result;
use kidguard_storage::ClassificationResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::classifier::ClassifierAdapter;
use crate::features::{aggregate, FeatureVector};
use crate::policy::PolicyStore;
use crate::sensing::SessionSnapshot;

/// Topic name carried by every feature message
pub const SENSOR_VALUES_TOPIC: &str = "kidguard.sensor_values";

/// A feature vector in transit from the aggregator (or an IPC client) to the classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMessage {
    pub owner: Option<String>,
    pub session_id: Option<Uuid>,
    pub values: Vec<f32>,
}

impl FeatureMessage {
    #[must_use]
    pub fn from_vector(owner: Option<String>, session_id: Option<Uuid>, vector: &FeatureVector) -> Self {
        Self {
            owner,
            session_id,
            values: vector.to_vec(),
        }
    }

    /// Aggregate a sealed session into its feature message
    #[must_use]
    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        let vector = aggregate(&snapshot.samples);
        Self::from_vector(Some(snapshot.owner.clone()), Some(snapshot.id), &vector)
    }

    #[must_use]
    pub const fn topic(&self) -> &'static str {
        SENSOR_VALUES_TOPIC
    }
}

/// Consumes feature messages, classifies them, and commits the result
///
/// The pipeline is the only writer of the policy store.
pub struct ClassificationPipeline {
    classifier: Option<Arc<ClassifierAdapter>>,
    store: PolicyStore,
}

impl ClassificationPipeline {
    /// `classifier` is `None` when the model failed to load; messages are then
    /// logged and dropped and the policy is left untouched.
    #[must_use]
    pub fn new(classifier: Option<Arc<ClassifierAdapter>>, store: PolicyStore) -> Self {
        Self { classifier, store }
    }

    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.classifier.is_some()
    }

    /// Classify one message and commit the outcome
    ///
    /// # Errors
    ///
    /// Returns an error if no classifier is loaded, the payload has the wrong
    /// length, the model output is invalid, or the commit fails. The policy is
    /// unchanged in every error case.
    pub fn process(&self, message: &FeatureMessage) -> Result<ClassificationResult> {
        let Some(classifier) = &self.classifier else {
            anyhow::bail!("No classifier loaded; dropping {} message", message.topic());
        };

        let result = classifier.classify(&message.values)?;
        let state = self.store.record(message.owner.as_deref(), &result)?;

        if state.restricted_mode {
            log::info!("Kid mode activated. Some apps are blocked.");
        } else {
            log::info!("Adult detected; restricted mode off");
        }
        log::debug!(
            "Committed classification p={:.4} label={} for session {:?}",
            result.probability(),
            result.label(),
            message.session_id
        );
        Ok(result)
    }

    /// Consume messages until every sender is dropped or `drain` fires
    ///
    /// On drain the channel is closed to new messages and whatever is already
    /// queued is still classified.
    pub async fn run(
        self,
        mut rx: mpsc::Receiver<FeatureMessage>,
        mut drain: watch::Receiver<bool>,
    ) {
        log::info!("Classification pipeline started (classifier ready: {})", self.is_ready());
        let mut draining = false;
        loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Some(message) => {
                        if let Err(e) = self.process(&message) {
                            log::error!("Failed to classify {} message: {e:#}", message.topic());
                        }
                    }
                    None => break,
                },
                _ = drain.changed(), if !draining => {
                    log::info!("Draining classification queue");
                    draining = true;
                    rx.close();
                }
            }
        }
        log::info!("Classification pipeline stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::BinaryModel;
    use crate::features::FEATURE_LEN;
    use crate::policy::BlockList;
    use kidguard_storage::{Database, Label};

    struct FixedModel(f32);

    impl BinaryModel for FixedModel {
        fn input_len(&self) -> usize {
            FEATURE_LEN
        }

        fn predict(&self, _input: &[f32]) -> f32 {
            self.0
        }
    }

    fn pipeline(p: Option<f32>) -> (ClassificationPipeline, PolicyStore) {
        let store = PolicyStore::new(
            Arc::new(Database::open_in_memory().unwrap()),
            ["com.a"].into_iter().collect::<BlockList>(),
        );
        let classifier =
            p.map(|p| Arc::new(ClassifierAdapter::with_model(FixedModel(p)).unwrap()));
        (ClassificationPipeline::new(classifier, store.clone()), store)
    }

    fn message(len: usize) -> FeatureMessage {
        FeatureMessage {
            owner: Some(String::from("alice")),
            session_id: None,
            values: vec![0.0; len],
        }
    }

    #[test]
    fn test_kid_result_enables_restricted_mode() {
        let (pipeline, store) = pipeline(Some(0.2));
        let result = pipeline.process(&message(FEATURE_LEN)).unwrap();
        assert_eq!(result.label(), Label::Kid);

        let state = store.read().unwrap();
        assert!(state.restricted_mode);
        assert!(state.blocks("com.a"));
    }

    #[test]
    fn test_wrong_arity_leaves_policy_unchanged() {
        let (pipeline, store) = pipeline(Some(0.2));
        assert!(pipeline.process(&message(7)).is_err());

        let state = store.read().unwrap();
        assert!(state.latest_result.is_none());
        assert!(!state.restricted_mode);
    }

    #[test]
    fn test_missing_classifier_drops_messages() {
        let (pipeline, store) = pipeline(None);
        assert!(!pipeline.is_ready());
        assert!(pipeline.process(&message(FEATURE_LEN)).is_err());
        assert!(store.read().unwrap().latest_result.is_none());
    }

    #[tokio::test]
    async fn test_run_processes_until_senders_drop() {
        let (pipeline, store) = pipeline(Some(0.9));
        let (tx, rx) = mpsc::channel(4);
        tx.send(message(3)).await.unwrap();
        tx.send(message(FEATURE_LEN)).await.unwrap();
        drop(tx);
        let (_drain_tx, drain_rx) = watch::channel(false);

        pipeline.run(rx, drain_rx).await;

        let state = store.read().unwrap();
        assert_eq!(state.latest_result.unwrap().label(), Label::Adult);
        assert!(!state.restricted_mode);
        assert_eq!(store.history(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_drain_finishes_queued_work_with_live_senders() {
        let (pipeline, store) = pipeline(Some(0.1));
        let (tx, rx) = mpsc::channel(4);
        let (drain_tx, drain_rx) = watch::channel(false);
        tx.send(message(FEATURE_LEN)).await.unwrap();
        drain_tx.send(true).unwrap();

        pipeline.run(rx, drain_rx).await;

        assert!(store.read().unwrap().restricted_mode);
        assert!(tx.send(message(FEATURE_LEN)).await.is_err());
    }

    #[test]
    fn test_message_from_empty_snapshot_is_full_length() {
        let recorder = crate::sensing::SessionRecorder::new(10);
        recorder.start("alice").unwrap();
        let snapshot = recorder.stop_active().unwrap();

        let message = FeatureMessage::from_snapshot(&snapshot);
        assert_eq!(message.values, vec![0.0; FEATURE_LEN]);
        assert_eq!(message.owner.as_deref(), Some("alice"));
        assert_eq!(message.topic(), SENSOR_VALUES_TOPIC);
    }
}
