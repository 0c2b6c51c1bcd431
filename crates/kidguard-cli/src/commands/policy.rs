//! Policy readout, classification history and manual classification

use anyhow::Result;
use clap::Subcommand;
use std::path::Path;
use std::sync::Arc;
use tabled::{Table, Tabled};
use kidguard_core::{
    config::Config,
    ipc::{IpcRequest, IpcResponse},
    PolicyStore,
};
use kidguard_storage::{ClassificationRecord, Database};

use super::helpers::{format_local, format_probability};
use super::session::send;

#[derive(Subcommand, Debug)]
pub enum PolicyAction {
    /// Show the committed policy (default)
    Show,
    /// Lift restricted mode and forget the latest classification
    Clear,
}

#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "Decided at")]
    decided_at: String,
    #[tabled(rename = "Owner")]
    owner: String,
    #[tabled(rename = "Label")]
    label: String,
    #[tabled(rename = "P(adult)")]
    probability: String,
}

impl From<&ClassificationRecord> for HistoryRow {
    fn from(record: &ClassificationRecord) -> Self {
        Self {
            decided_at: format_local(record.result.decided_at()),
            owner: record.owner.clone().unwrap_or_else(|| String::from("-")),
            label: record.result.label().to_string(),
            probability: format_probability(record.result.probability()),
        }
    }
}

fn open_store(config_path: Option<&Path>) -> Result<PolicyStore> {
    let config = Config::load(config_path)?;
    Ok(PolicyStore::new(
        Arc::new(Database::new(None)?),
        config.monitor.blocked_apps.iter().cloned().collect(),
    ))
}

/// Handle policy commands
pub fn handle_policy_command(action: Option<PolicyAction>, config_path: Option<&Path>) -> Result<()> {
    let store = open_store(config_path)?;
    match action.unwrap_or(PolicyAction::Show) {
        PolicyAction::Show => {
            let state = store.read()?;
            println!(
                "Restricted mode: {}",
                if state.restricted_mode { "ON" } else { "off" }
            );
            match state.latest_result {
                Some(result) => println!(
                    "Last classification: {} (p={}) at {}",
                    result.label(),
                    format_probability(result.probability()),
                    format_local(result.decided_at())
                ),
                None => println!("No classification yet."),
            }
            println!("\nBlocked while restricted:");
            for app in state.blocked_set.iter() {
                println!("  {app}");
            }
        }
        PolicyAction::Clear => {
            store.clear()?;
            println!("Policy cleared. Restricted mode is off.");
        }
    }
    Ok(())
}

pub fn handle_history_command(limit: usize, config_path: Option<&Path>) -> Result<()> {
    let records = open_store(config_path)?.history(limit)?;
    if records.is_empty() {
        println!("No classifications recorded.");
        return Ok(());
    }

    let rows: Vec<HistoryRow> = records.iter().map(HistoryRow::from).collect();
    println!("{}", Table::new(rows));
    Ok(())
}

/// Submit a precomputed feature vector to the daemon's classifier
pub async fn handle_classify_command(
    data_dir: &Path,
    owner: Option<String>,
    values: Vec<f32>,
) -> Result<()> {
    match send(data_dir, IpcRequest::SensorValues { owner, values }).await? {
        IpcResponse::Accepted => {
            println!("Feature vector queued for classification.");
            Ok(())
        }
        IpcResponse::Error(message) => anyhow::bail!("{message}"),
        other => anyhow::bail!("Unexpected response from daemon: {other:?}"),
    }
}
