//! Recording session commands, forwarded to the daemon over IPC

use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::Path;
use kidguard_core::ipc::{IpcClient, IpcRequest, IpcResponse};

use super::daemon::socket_path;

#[derive(Subcommand, Debug)]
pub enum SessionAction {
    /// Start recording motion data for an owner
    Start {
        /// Identity the recording is attributed to
        owner: String,
    },
    /// Stop recording and classify the session
    Stop,
}

/// Handle session commands
pub async fn handle_session_command(action: SessionAction, data_dir: &Path) -> Result<()> {
    let request = match action {
        SessionAction::Start { owner } => IpcRequest::StartSession { owner },
        SessionAction::Stop => IpcRequest::StopSession,
    };

    match send(data_dir, request).await? {
        IpcResponse::SessionStarted { session_id } => {
            println!("Recording session {session_id} started.");
            println!("Stop it with: kidguard session stop");
        }
        IpcResponse::SessionStopped(Some(summary)) => {
            println!("Session {} stopped.", summary.session_id);
            println!(
                "  Samples: {} linear acceleration, {} rotation vector",
                summary.linear_acceleration_samples, summary.rotation_vector_samples
            );
            if summary.dropped > 0 {
                println!("  Dropped (buffer full): {}", summary.dropped);
            }
            println!("Classification will be committed shortly; check with: kidguard policy");
        }
        IpcResponse::SessionStopped(None) => println!("No session is recording."),
        IpcResponse::Error(message) => anyhow::bail!("{message}"),
        other => anyhow::bail!("Unexpected response from daemon: {other:?}"),
    }
    Ok(())
}

/// Send one request to the running daemon
///
/// # Errors
///
/// Returns an error if the daemon is not reachable
pub async fn send(data_dir: &Path, request: IpcRequest) -> Result<IpcResponse> {
    let sock_path = socket_path(data_dir);
    IpcClient::new(&sock_path)
        .send_command(request)
        .await
        .context("Daemon is not running. Start it with: kidguard start")
}
