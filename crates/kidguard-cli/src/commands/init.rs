//! First-time setup: configuration file, database and platform guidance

use anyhow::Result;
use kidguard_core::config::Config;
use kidguard_storage::Database;
use std::path::{Path, PathBuf};

/// Initialize kidguard
///
/// # Errors
///
/// Returns an error if the config file or the database cannot be created
pub fn init_command(config_path: Option<&Path>, force: bool) -> Result<()> {
    println!("Initializing kidguard...\n");

    println!("Step 1/3: Configuration");
    println!("{}", "-".repeat(40));
    let config = setup_config(config_path, force)?;

    println!("\nStep 2/3: Database Setup");
    println!("{}", "-".repeat(40));
    let db = Database::new(None)?;
    drop(db);
    println!("Database ready at: {}", Database::default_db_path().display());

    println!("\nStep 3/3: Classifier and Permissions");
    println!("{}", "-".repeat(40));
    let model_path = config.classifier.resolved_model_path()?;
    if model_path.exists() {
        println!("Classifier model found at: {}", model_path.display());
    } else {
        println!("No classifier model at: {}", model_path.display());
        println!("The daemon will record sessions but cannot classify until one is installed.");
    }
    show_permission_guidance();

    println!("\nSetup complete. Start recording with:");
    println!("  kidguard start");
    println!("  kidguard monitor start");
    println!("  kidguard session start <owner>");

    Ok(())
}

fn setup_config(config_path: Option<&Path>, force: bool) -> Result<Config> {
    let path: PathBuf = match config_path {
        Some(p) => p.to_path_buf(),
        None => Config::default_path()?,
    };

    if path.exists() && !force {
        println!("Config already exists at: {}", path.display());
        println!("Use --force to overwrite it with defaults.");
        return Config::load(Some(&path));
    }

    let config = Config::default();
    config.save(&path)?;
    println!("Default config written to: {}", path.display());
    Ok(config)
}

fn show_permission_guidance() {
    #[cfg(target_os = "macos")]
    {
        println!("The enforcement monitor reads the frontmost app via System Events.");
        println!("Grant your terminal Automation and Accessibility permission in");
        println!("System Settings > Privacy & Security.");
    }

    #[cfg(target_os = "linux")]
    {
        println!("The enforcement monitor needs `xdotool` (X11) to see the focused window.");
        println!("Set `monitor.deny_command` in the config to push blocked apps away,");
        println!("e.g. [\"xdotool\", \"getactivewindow\", \"windowminimize\"].");
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        println!("Foreground app detection is not supported on this platform.");
    }
}
