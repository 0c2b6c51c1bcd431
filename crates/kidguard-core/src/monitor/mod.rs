//! Foreground application observation and enforcement.

use anyhow::Result;
use async_trait::async_trait;

pub mod enforcement;

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(target_os = "linux")]
pub mod linux;

pub use enforcement::{
    CommandEnforcer, EnforcementDecision, EnforcementMonitor, Enforcer, MonitorState, BLOCK_NOTICE,
};

/// Reports which application currently owns the foreground
#[async_trait]
pub trait ForegroundAppObserver: Send + Sync {
    /// Identifier of the foreground application, or `None` if it cannot be determined
    ///
    /// # Errors
    ///
    /// Returns an error if the platform query itself fails
    async fn foreground_app(&self) -> Result<Option<String>>;

    fn name(&self) -> &'static str;
}

/// Create the platform-specific foreground observer
///
/// # Errors
///
/// Returns an error if the current platform is not supported
pub fn create_observer() -> Result<Box<dyn ForegroundAppObserver>> {
    #[cfg(target_os = "macos")]
    {
        Ok(Box::new(macos::MacOSObserver::new()))
    }

    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(linux::LinuxObserver::new()))
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        anyhow::bail!("Unsupported platform")
    }
}
