use std::sync::{Arc, Mutex};
use std::time::Duration;

use kidguard_core::classifier::BinaryModel;
use kidguard_core::monitor::{EnforcementDecision, EnforcementMonitor, Enforcer, ForegroundAppObserver};
use kidguard_core::sensing::NullProvider;
use kidguard_core::telemetry::NullTelemetrySink;
use kidguard_core::{
    BlockList, ClassificationPipeline, ClassifierAdapter, PolicyStore, SensorKind,
    SessionController, SessionRecorder, FEATURE_LEN,
};
use kidguard_storage::{Database, Label};
use tokio::sync::{mpsc, watch};

/// Returns a fixed probability and remembers the last input
struct StubModel {
    probability: f32,
    seen: Arc<Mutex<Vec<f32>>>,
}

impl BinaryModel for StubModel {
    fn input_len(&self) -> usize {
        FEATURE_LEN
    }

    fn predict(&self, input: &[f32]) -> f32 {
        *self.seen.lock().unwrap() = input.to_vec();
        self.probability
    }
}

struct NoObserver;

#[async_trait::async_trait]
impl ForegroundAppObserver for NoObserver {
    async fn foreground_app(&self) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

struct SilentEnforcer;

#[async_trait::async_trait]
impl Enforcer for SilentEnforcer {
    async fn deny_foreground(&self, _app_id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn show_notice(&self, _message: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

fn block_list() -> BlockList {
    ["com.a"].into_iter().collect()
}

/// Record one session for `owner` through the full daemon path and return
/// the features the classifier saw
async fn run_session(db: Arc<Database>, owner: &str, probability: f32) -> Vec<f32> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let classifier = ClassifierAdapter::with_model(StubModel {
        probability,
        seen: Arc::clone(&seen),
    })
    .unwrap();
    let store = PolicyStore::new(db, block_list());

    let (features_tx, features_rx) = mpsc::channel(4);
    let (drain_tx, drain_rx) = watch::channel(false);
    let pipeline = ClassificationPipeline::new(Some(Arc::new(classifier)), store);
    let pipeline_task = tokio::spawn(pipeline.run(features_rx, drain_rx));

    let controller = SessionController::new(
        Arc::new(SessionRecorder::new(1000)),
        Box::new(NullProvider),
        Arc::new(NullTelemetrySink),
        features_tx,
        Duration::from_millis(200),
    );

    controller.start_session(owner).await.unwrap();
    for i in 0..10 {
        #[allow(clippy::cast_precision_loss)]
        let v = i as f32;
        controller
            .recorder()
            .push(SensorKind::LinearAcceleration, [v, 1.0, -v]);
        controller
            .recorder()
            .push(SensorKind::RotationVector, [0.5, 0.25, 0.0]);
    }

    let summary = controller.stop_session().await.unwrap();
    assert_eq!(summary.owner, owner);
    assert_eq!(summary.linear_acceleration_samples, 10);
    assert_eq!(summary.rotation_vector_samples, 10);

    controller.shutdown(Duration::from_secs(5)).await;
    drain_tx.send_replace(true);
    pipeline_task.await.unwrap();

    let mut features = Vec::new();
    features.clone_from(&*seen.lock().unwrap());
    features
}

#[tokio::test]
async fn test_alice_session_turns_on_restricted_mode() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("kidguard.db");
    let db = Arc::new(Database::new(Some(db_path.clone())).unwrap());

    let features = run_session(Arc::clone(&db), "alice", 0.2).await;
    assert_eq!(features.len(), FEATURE_LEN);
    // linear acceleration: x = 0..9, y = 1, z = -x
    assert!((features[0] - 4.5).abs() < 1e-5);
    assert!((features[1] - 1.0).abs() < 1e-5);
    assert!((features[2] + 4.5).abs() < 1e-5);
    assert!((features[3] - 8.25).abs() < 1e-4);
    assert!(features[4].abs() < 1e-6);
    // rotation vector is constant
    assert!((features[6] - 0.5).abs() < 1e-6);
    assert!((features[7] - 0.25).abs() < 1e-6);
    assert!(features[9..].iter().all(|v| v.abs() < 1e-6));

    let store = PolicyStore::new(Arc::clone(&db), block_list());
    let state = store.read().unwrap();
    assert!(state.restricted_mode);
    let result = state.latest_result.unwrap();
    assert_eq!(result.label(), Label::Kid);
    assert!((result.probability() - 0.2).abs() < 1e-6);

    let history = store.history(10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].owner.as_deref(), Some("alice"));

    let mut monitor = EnforcementMonitor::new(
        Box::new(NoObserver),
        Box::new(SilentEnforcer),
        store,
        Duration::from_millis(100),
    );
    assert_eq!(
        monitor.handle_transition("com.a").await.unwrap(),
        EnforcementDecision::Block
    );
    assert_eq!(
        monitor.handle_transition("com.b").await.unwrap(),
        EnforcementDecision::Allow
    );

    drop(monitor);
    drop(db);
    let reopened = PolicyStore::new(Arc::new(Database::new(Some(db_path)).unwrap()), block_list());
    assert!(reopened.read().unwrap().restricted_mode);
}

#[tokio::test]
async fn test_adult_session_lifts_restriction() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    run_session(Arc::clone(&db), "alice", 0.2).await;
    run_session(Arc::clone(&db), "bob", 0.8).await;

    let store = PolicyStore::new(db, block_list());
    let state = store.read().unwrap();
    assert!(!state.restricted_mode);
    assert_eq!(state.latest_result.unwrap().label(), Label::Adult);
    assert!(!state.blocks("com.a"));

    let owners: Vec<Option<String>> = store
        .history(10)
        .unwrap()
        .into_iter()
        .map(|r| r.owner)
        .collect();
    assert_eq!(owners, vec![Some(String::from("bob")), Some(String::from("alice"))]);
}
