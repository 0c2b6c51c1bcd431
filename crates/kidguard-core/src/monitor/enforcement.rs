use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::MissedTickBehavior;

use super::ForegroundAppObserver;
use crate::config::MonitorConfig;
use crate::daemon::termination_signal;
use crate::policy::{PolicyState, PolicyStore};

/// Shown whenever a transition is denied
pub const BLOCK_NOTICE: &str = "This app is blocked for kids.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Evaluating,
    Blocking,
    Allowing,
}

/// Outcome for one foreground transition; never persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementDecision {
    Block,
    Allow,
}

impl EnforcementDecision {
    #[must_use]
    pub fn for_app(policy: &PolicyState, app_id: &str) -> Self {
        if policy.blocks(app_id) {
            Self::Block
        } else {
            Self::Allow
        }
    }
}

/// Platform action taken on a blocked transition
#[async_trait]
pub trait Enforcer: Send + Sync {
    /// Push `app_id` out of the foreground
    ///
    /// # Errors
    ///
    /// Returns an error if the platform action fails
    async fn deny_foreground(&self, app_id: &str) -> Result<()>;

    /// Tell the user why
    ///
    /// # Errors
    ///
    /// Returns an error if the notice cannot be shown
    async fn show_notice(&self, message: &str) -> Result<()>;
}

/// Runs configured commands; without a command the action is only logged
pub struct CommandEnforcer {
    deny_command: Option<Vec<String>>,
    notice_command: Option<Vec<String>>,
}

impl CommandEnforcer {
    #[must_use]
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            deny_command: config.deny_command.clone(),
            notice_command: config.notice_command.clone(),
        }
    }

    async fn run(template: &[String], placeholder: &str, value: &str) -> Result<()> {
        let argv = substitute(template, placeholder, value);
        let Some((program, args)) = argv.split_first() else {
            anyhow::bail!("Empty enforcement command");
        };

        let status = Command::new(program)
            .args(args)
            .status()
            .await
            .with_context(|| format!("Failed to run {program}"))?;
        if !status.success() {
            anyhow::bail!("{program} exited with {status}");
        }
        Ok(())
    }
}

#[async_trait]
impl Enforcer for CommandEnforcer {
    async fn deny_foreground(&self, app_id: &str) -> Result<()> {
        match &self.deny_command {
            Some(template) => Self::run(template, "{app}", app_id).await,
            None => {
                log::warn!("No deny command configured; {app_id} stays in the foreground");
                Ok(())
            }
        }
    }

    async fn show_notice(&self, message: &str) -> Result<()> {
        match &self.notice_command {
            Some(template) => Self::run(template, "{message}", message).await,
            None => {
                log::info!("{message}");
                Ok(())
            }
        }
    }
}

fn substitute(template: &[String], placeholder: &str, value: &str) -> Vec<String> {
    template
        .iter()
        .map(|arg| arg.replace(placeholder, value))
        .collect()
}

/// Watches foreground transitions and denies blocked apps while restricted
/// mode is on
///
/// Every transition reads the policy afresh from the store, so a
/// classification committed by the daemon applies from the next transition.
pub struct EnforcementMonitor {
    observer: Box<dyn ForegroundAppObserver>,
    enforcer: Box<dyn Enforcer>,
    policy: PolicyStore,
    state: MonitorState,
    last_app: Option<String>,
    poll_interval: Duration,
}

impl EnforcementMonitor {
    #[must_use]
    pub fn new(
        observer: Box<dyn ForegroundAppObserver>,
        enforcer: Box<dyn Enforcer>,
        policy: PolicyStore,
        poll_interval: Duration,
    ) -> Self {
        Self {
            observer,
            enforcer,
            policy,
            state: MonitorState::Idle,
            last_app: None,
            poll_interval,
        }
    }

    #[must_use]
    pub const fn state(&self) -> MonitorState {
        self.state
    }

    /// Query the observer once; a changed app identifier is handled as a transition
    ///
    /// An empty observation (nothing focused, e.g. after a blocked app was
    /// minimized) forgets the last app, so the next sighting of any app,
    /// including the same one, is a new transition.
    ///
    /// # Errors
    ///
    /// Returns an error if the observer or the policy read fails
    pub async fn poll_once(&mut self) -> Result<Option<EnforcementDecision>> {
        let Some(app) = self.observer.foreground_app().await? else {
            self.last_app = None;
            return Ok(None);
        };
        if self.last_app.as_deref() == Some(app.as_str()) {
            return Ok(None);
        }

        log::debug!("Foreground changed to {app}");
        self.last_app = Some(app.clone());
        self.handle_transition(&app).await.map(Some)
    }

    /// Decide and enforce one foreground transition
    ///
    /// Enforcer failures are logged and do not change the decision.
    ///
    /// # Errors
    ///
    /// Returns an error if the policy cannot be read; nothing is enforced then
    pub async fn handle_transition(&mut self, app_id: &str) -> Result<EnforcementDecision> {
        self.state = MonitorState::Evaluating;
        let policy = match self.policy.read() {
            Ok(policy) => policy,
            Err(e) => {
                self.state = MonitorState::Idle;
                return Err(e.context("Failed to read policy state"));
            }
        };

        let decision = EnforcementDecision::for_app(&policy, app_id);
        match decision {
            EnforcementDecision::Block => {
                self.state = MonitorState::Blocking;
                log::info!("Blocking {app_id} (restricted mode)");
                if let Err(e) = self.enforcer.deny_foreground(app_id).await {
                    log::warn!("Failed to deny {app_id}: {e:#}");
                }
                if let Err(e) = self.enforcer.show_notice(BLOCK_NOTICE).await {
                    log::warn!("Failed to show block notice: {e:#}");
                }
            }
            EnforcementDecision::Allow => {
                self.state = MonitorState::Allowing;
                log::debug!("Allowing {app_id}");
            }
        }

        self.state = MonitorState::Idle;
        Ok(decision)
    }

    /// Poll until SIGINT or SIGTERM
    pub async fn run(&mut self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        log::info!(
            "Enforcement monitor started ({} observer, {} blocked apps, every {:?})",
            self.observer.name(),
            self.policy.blocked_set().len(),
            self.poll_interval
        );

        let shutdown = termination_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        log::warn!("Enforcement poll failed: {e:#}");
                    }
                }
                () = &mut shutdown => break,
            }
        }
        log::info!("Enforcement monitor stopped");
    }
}
