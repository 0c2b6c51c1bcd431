mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use kidguard_core::config::get_data_dir;
use std::path::PathBuf;

use commands::{
    monitor::MonitorAction, policy::PolicyAction, session::SessionAction,
};

#[derive(Parser)]
#[command(name = "kidguard")]
#[command(about = "Motion-based kid detection with app blocking", long_about = None)]
struct Cli {
    /// Config file (defaults to <data dir>/kidguard/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize kidguard (first-time setup)
    Init {
        /// Overwrite an existing config file with defaults
        #[arg(long)]
        force: bool,
    },
    /// Start the recording daemon
    Start,
    /// (Internal) Run the daemon process
    #[command(hide = true)]
    DaemonInternalStart,
    /// Stop the recording daemon
    Stop,
    /// Check daemon status and the current policy
    Status,
    /// Start or stop a recording session
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Run, start or stop the enforcement monitor
    Monitor {
        #[command(subcommand)]
        action: MonitorAction,
    },
    /// (Internal) Run the enforcement monitor process
    #[command(hide = true)]
    MonitorInternalStart,
    /// Show or clear the policy
    Policy {
        #[command(subcommand)]
        action: Option<PolicyAction>,
    },
    /// List past classifications, newest first
    History {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Classify a precomputed feature vector through the daemon
    Classify {
        /// Owner to attribute the classification to
        #[arg(long)]
        owner: Option<String>,
        /// Feature values (means then variances, linear acceleration then rotation vector)
        #[arg(required = true, allow_negative_numbers = true)]
        values: Vec<f32>,
    },
    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if !matches!(
        cli.command,
        Commands::DaemonInternalStart | Commands::MonitorInternalStart
    ) {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format_timestamp_secs()
            .init();
    }

    let data_dir = get_data_dir()?;
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Init { force } => commands::init::init_command(config_path, force),
        Commands::Start => commands::daemon::start_daemon(&data_dir, config_path),
        Commands::DaemonInternalStart => commands::daemon::run_daemon_process(config_path).await,
        Commands::Stop => commands::daemon::stop_daemon(&data_dir).await,
        Commands::Status => commands::daemon::show_status(&data_dir).await,
        Commands::Session { action } => {
            commands::session::handle_session_command(action, &data_dir).await
        }
        Commands::Monitor { action } => {
            commands::monitor::handle_monitor_command(action, &data_dir, config_path).await
        }
        Commands::MonitorInternalStart => {
            commands::monitor::run_monitor_process(config_path).await
        }
        Commands::Policy { action } => {
            commands::policy::handle_policy_command(action, config_path)
        }
        Commands::History { limit } => commands::policy::handle_history_command(limit, config_path),
        Commands::Classify { owner, values } => {
            commands::policy::handle_classify_command(&data_dir, owner, values).await
        }
        Commands::Config => commands::config::handle_config_show(config_path),
    }
}
