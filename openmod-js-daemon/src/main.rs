//! # openmod-js-daemon
//!
//! Standalone host for OpenMod JavaScript bundles.
//!
//! The daemon:
//! - Loads its configuration and sets up logging
//! - Provisions the native engine asset on first load
//! - Runs every bundle under `<working_directory>/scripts`
//! - Unloads the scripts on Ctrl+C
//!
//! ## Configuration
//!
//! The daemon reads configuration from `$XDG_CONFIG_HOME/openmod-js/config.toml`.
//!
//! ## Running
//!
//! ```bash
//! # Start the daemon
//! cargo run --bin openmod-js-daemon
//!
//! # With debug logging
//! RUST_LOG=debug cargo run --bin openmod-js-daemon
//! ```

use anyhow::Result;
use openmod_js_daemon::config::Config;
use openmod_js_daemon::plugin::JavaScriptPlugin;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let loaded = Config::load_default();
    let log_level = loaded
        .as_ref()
        .map(|config| config.host.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("Starting openmod-js-daemon v{}", env!("CARGO_PKG_VERSION"));

    let config = match loaded {
        Ok(cfg) => {
            info!("Loaded configuration from default path");
            cfg
        }
        Err(e) => {
            warn!("Failed to load config, using defaults: {:#}", e);
            Config::default()
        }
    };

    info!("Working directory: {}", config.working_directory()?.display());

    let plugin = JavaScriptPlugin::from_config(&config)?;
    match plugin.load().await {
        Ok(report) => {
            for failure in &report.failed {
                warn!("Script {} failed: {}", failure.script_id, failure.cause);
            }
        }
        Err(e) => error!("{:#}", e),
    }

    info!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    plugin.unload().await;

    info!("Daemon stopped");
    Ok(())
}
