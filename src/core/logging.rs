//! Logging initialization
//!
//! Everything logs through `tracing`. Records emitted through the `log` crate
//! (teloxide, reqwest) are forwarded by `tracing-log`.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Filter used when RUST_LOG is not set
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Initialize the global subscriber (console output, RUST_LOG filtering)
///
/// # Returns
/// * `Ok(())` - Logger initialized successfully
/// * `Err(anyhow::Error)` - A global logger was already installed
pub fn init_logger() -> Result<()> {
    tracing_log::LogTracer::init().map_err(|e| anyhow::anyhow!("Failed to install log bridge: {}", e))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    Ok(())
}
