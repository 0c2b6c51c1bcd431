use anyhow::Result;
use kidguard_storage::ClassificationResult;
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{UnixListener, UnixStream},
    sync::{mpsc, watch},
};
use uuid::Uuid;

use crate::classifier::ClassifierError;
use crate::features::FEATURE_LEN;
use crate::pipeline::FeatureMessage;
use crate::policy::PolicyStore;
use crate::sensing::{SensorKind, SessionController, SessionSummary};

/// Requests larger than this are dropped unread
const MAX_REQUEST_BYTES: u64 = 64 * 1024;

/// IPC request from CLI to daemon
#[derive(Serialize, Deserialize, Debug)]
pub enum IpcRequest {
    Status,
    StartSession { owner: String },
    StopSession,
    /// A precomputed feature vector, classified as if a session had produced it
    SensorValues {
        owner: Option<String>,
        values: Vec<f32>,
    },
    Shutdown,
}

/// IPC response from daemon to CLI
#[derive(Serialize, Deserialize, Debug)]
pub enum IpcResponse {
    Status(DaemonStatus),
    SessionStarted { session_id: Uuid },
    /// `None` when no session was active
    SessionStopped(Option<SessionSummary>),
    Accepted,
    Error(String),
    Shutdown,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ActiveSessionInfo {
    pub session_id: Uuid,
    pub owner: String,
    pub linear_acceleration_samples: usize,
    pub rotation_vector_samples: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DaemonStatus {
    pub classifier_ready: bool,
    pub active_session: Option<ActiveSessionInfo>,
    pub restricted_mode: bool,
    pub latest_result: Option<ClassificationResult>,
}

#[derive(Debug)]
pub struct IpcClient {
    sock_path: PathBuf,
}

impl IpcClient {
    #[must_use]
    pub fn new(sock_path: &Path) -> Self {
        Self {
            sock_path: sock_path.to_path_buf(),
        }
    }

    /// Send one request and wait for the reply
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon is unreachable or the reply cannot be decoded
    pub async fn send_command(&self, request: IpcRequest) -> Result<IpcResponse> {
        let mut stream = UnixStream::connect(&self.sock_path).await?;

        let encoded = bincode::serialize(&request)?;
        stream.write_all(&encoded).await?;
        stream.shutdown().await?;

        let mut buffer = Vec::new();
        stream.read_to_end(&mut buffer).await?;
        let response: IpcResponse = bincode::deserialize(&buffer)?;

        Ok(response)
    }
}

pub struct DaemonIpcHandler {
    controller: Arc<SessionController>,
    features_tx: mpsc::Sender<FeatureMessage>,
    policy: PolicyStore,
    classifier_ready: bool,
    shutdown_tx: watch::Sender<bool>,
}

impl DaemonIpcHandler {
    #[must_use]
    pub fn new(
        controller: Arc<SessionController>,
        features_tx: mpsc::Sender<FeatureMessage>,
        policy: PolicyStore,
        classifier_ready: bool,
        shutdown_tx: watch::Sender<bool>,
    ) -> Self {
        Self {
            controller,
            features_tx,
            policy,
            classifier_ready,
            shutdown_tx,
        }
    }

    /// Produce the reply for one request
    pub async fn respond(&self, request: IpcRequest) -> IpcResponse {
        match request {
            IpcRequest::Status => match self.status() {
                Ok(status) => IpcResponse::Status(status),
                Err(e) => IpcResponse::Error(format!("{e:#}")),
            },
            IpcRequest::StartSession { owner } => {
                match self.controller.start_session(&owner).await {
                    Ok(handle) => IpcResponse::SessionStarted {
                        session_id: handle.id(),
                    },
                    Err(e) => IpcResponse::Error(format!("{e:#}")),
                }
            }
            IpcRequest::StopSession => {
                IpcResponse::SessionStopped(self.controller.stop_session().await)
            }
            IpcRequest::SensorValues { owner, values } => self.accept_values(owner, values),
            IpcRequest::Shutdown => {
                self.shutdown_tx.send_replace(true);
                IpcResponse::Shutdown
            }
        }
    }

    fn status(&self) -> Result<DaemonStatus> {
        let policy = self.policy.read()?;
        let recorder = self.controller.recorder();
        let active_session = recorder.active_handle().map(|handle| ActiveSessionInfo {
            session_id: handle.id(),
            owner: handle.owner().to_string(),
            linear_acceleration_samples: recorder.sample_count(SensorKind::LinearAcceleration),
            rotation_vector_samples: recorder.sample_count(SensorKind::RotationVector),
        });

        Ok(DaemonStatus {
            classifier_ready: self.classifier_ready,
            active_session,
            restricted_mode: policy.restricted_mode,
            latest_result: policy.latest_result,
        })
    }

    fn accept_values(&self, owner: Option<String>, values: Vec<f32>) -> IpcResponse {
        if !self.classifier_ready {
            return IpcResponse::Error(String::from("Classifier is not loaded"));
        }
        if values.len() != FEATURE_LEN {
            let err = ClassifierError::Arity {
                expected: FEATURE_LEN,
                actual: values.len(),
            };
            log::error!("Rejected sensor values from IPC: {err}");
            return IpcResponse::Error(err.to_string());
        }

        let message = FeatureMessage {
            owner,
            session_id: None,
            values,
        };
        match self.features_tx.try_send(message) {
            Ok(()) => IpcResponse::Accepted,
            Err(e) => IpcResponse::Error(format!("Classification queue unavailable: {e}")),
        }
    }

    async fn handle(&self, stream: &mut UnixStream, request: IpcRequest) -> Result<()> {
        log::debug!("IPC request: {request:?}");
        let response = self.respond(request).await;
        let encoded = bincode::serialize(&response)?;
        stream.write_all(&encoded).await?;
        Ok(())
    }
}

/// Accept connections on `sock_path` until the task is dropped
///
/// # Errors
///
/// Returns an error if the socket cannot be bound
pub async fn listen(handler: Arc<DaemonIpcHandler>, sock_path: &Path) -> io::Result<()> {
    if sock_path.exists() {
        fs::remove_file(sock_path)?;
    }
    let listener = UnixListener::bind(sock_path)?;
    log::info!("IPC listening on {}", sock_path.display());

    loop {
        match listener.accept().await {
            Ok((mut stream, _)) => {
                let handler = handler.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let read = (&mut stream)
                        .take(MAX_REQUEST_BYTES)
                        .read_to_end(&mut buf)
                        .await;
                    match read {
                        Ok(0) => {} // Connection closed
                        Ok(_) => match bincode::deserialize::<IpcRequest>(&buf) {
                            Ok(request) => {
                                if let Err(e) = handler.handle(&mut stream, request).await {
                                    log::error!("IPC handle error: {e}");
                                }
                            }
                            Err(e) => {
                                log::error!("IPC deserialize error: {e}");
                            }
                        },
                        Err(e) => {
                            log::error!("IPC read error: {e}");
                        }
                    }
                });
            }
            Err(e) => {
                log::error!("IPC accept error: {e}");
            }
        }
    }
}
