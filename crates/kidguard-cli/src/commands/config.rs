//! Configuration display command handler

use anyhow::{Context, Result};
use kidguard_core::config::Config;
use std::path::Path;

pub fn handle_config_show(config_path: Option<&Path>) -> Result<()> {
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => Config::default_path()?,
    };
    let config = Config::load(Some(&path))?;

    let source = if path.exists() {
        path.display().to_string()
    } else {
        format!("defaults ({} not found)", path.display())
    };
    println!("# Effective configuration from {source}\n");
    println!(
        "{}",
        toml::to_string_pretty(&config).context("Failed to render config")?
    );
    Ok(())
}
