use crate::{
    classifier::ClassifierAdapter,
    config::{get_data_dir, Config},
    ipc::{listen, DaemonIpcHandler},
    pipeline::{ClassificationPipeline, FeatureMessage},
    policy::PolicyStore,
    sensing::{create_provider, SessionController, SessionRecorder},
    telemetry::create_sink,
};
use anyhow::Result;
use kidguard_storage::Database;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::{mpsc, watch};

/// Recording daemon: owns the session controller, the classification
/// pipeline and the IPC socket
pub struct Daemon {
    controller: Arc<SessionController>,
    pipeline: ClassificationPipeline,
    features_rx: mpsc::Receiver<FeatureMessage>,
    ipc_handler: Arc<DaemonIpcHandler>,
    shutdown_rx: watch::Receiver<bool>,
    sock_path: PathBuf,
    flush_timeout: Duration,
}

impl Daemon {
    /// Wire the daemon from configuration
    ///
    /// A classifier that fails to load is logged and leaves the daemon
    /// sensing only.
    ///
    /// # Errors
    ///
    /// Returns an error if the sensor provider or telemetry sink cannot be
    /// created or the data directory is unknown
    pub fn new(config: &Config, db: Database) -> Result<Self> {
        let policy = PolicyStore::new(
            Arc::new(db),
            config.monitor.blocked_apps.iter().cloned().collect(),
        );

        let classifier = match config
            .classifier
            .resolved_model_path()
            .and_then(|path| ClassifierAdapter::load(&path).map_err(Into::into))
        {
            Ok(classifier) => Some(Arc::new(classifier)),
            Err(e) => {
                log::error!("{e:#}; continuing with sensing only");
                None
            }
        };
        let classifier_ready = classifier.is_some();

        let (features_tx, features_rx) =
            mpsc::channel(config.daemon.feature_queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let controller = Arc::new(SessionController::new(
            Arc::new(SessionRecorder::new(config.sensing.max_samples_per_kind)),
            create_provider(&config.sensing)?,
            create_sink(&config.telemetry)?,
            features_tx.clone(),
            config.sensing.sampling_interval(),
        ));

        Ok(Self {
            ipc_handler: Arc::new(DaemonIpcHandler::new(
                Arc::clone(&controller),
                features_tx,
                policy.clone(),
                classifier_ready,
                shutdown_tx,
            )),
            controller,
            pipeline: ClassificationPipeline::new(classifier, policy),
            features_rx,
            shutdown_rx,
            sock_path: get_data_dir()?.join("kidguard.sock"),
            flush_timeout: config.daemon.flush_timeout(),
        })
    }

    /// Serve IPC until Ctrl-C, SIGTERM or an IPC shutdown, then flush
    ///
    /// # Errors
    ///
    /// Currently always succeeds; teardown problems are logged
    pub async fn run_with_signals(self) -> Result<()> {
        let Self {
            controller,
            pipeline,
            features_rx,
            ipc_handler,
            mut shutdown_rx,
            sock_path,
            flush_timeout,
        } = self;

        let listener = {
            let sock_path = sock_path.clone();
            tokio::spawn(async move {
                if let Err(e) = listen(ipc_handler, &sock_path).await {
                    log::error!("IPC listener failed: {e}");
                }
            })
        };

        let (drain_tx, drain_rx) = watch::channel(false);
        let mut pipeline_task = tokio::spawn(pipeline.run(features_rx, drain_rx));
        log::info!("Daemon started with signal handling and IPC");

        tokio::select! {
            () = termination_signal() => {}
            requested = shutdown_rx.wait_for(|stop| *stop) => {
                if requested.is_ok() {
                    log::info!("Shutdown requested over IPC");
                } else {
                    log::error!("IPC listener is gone, shutting down");
                }
            }
        }

        listener.abort();
        controller.shutdown(flush_timeout).await;

        drain_tx.send_replace(true);
        if tokio::time::timeout(flush_timeout, &mut pipeline_task)
            .await
            .is_err()
        {
            log::warn!("Classification pipeline did not drain within {flush_timeout:?}");
            pipeline_task.abort();
        }

        if sock_path.exists() {
            if let Err(e) = std::fs::remove_file(&sock_path) {
                log::warn!("Failed to remove {}: {e}", sock_path.display());
            }
        }
        log::info!("Daemon shut down gracefully.");
        Ok(())
    }
}

/// Resolve on Ctrl-C or SIGTERM
pub(crate) async fn termination_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => log::info!("Received Ctrl-C, shutting down..."),
                _ = sigterm.recv() => log::info!("Received SIGTERM, shutting down..."),
            }
        }
        Err(e) => {
            log::warn!("Cannot listen for SIGTERM: {e}");
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Received Ctrl-C, shutting down...");
            }
        }
    }
}
