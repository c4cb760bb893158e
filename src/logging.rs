//! Logging bootstrap.

use instrumentd_core::{InstrumentationError, Result};
use tracing_subscriber::EnvFilter;

/// Builds the filter: `RUST_LOG` when set and valid, else `default_filter`.
///
/// # Errors
/// Returns a configuration error if `default_filter` does not parse.
pub fn env_filter(default_filter: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(default_filter)
        .map_err(|e| InstrumentationError::config(format!("invalid log filter {default_filter:?}: {e}")))
}

/// Installs the global fmt subscriber.
///
/// # Errors
/// Returns a configuration error if the filter is invalid or a global
/// subscriber is already installed.
pub fn init_logging(default_filter: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_filter)?)
        .with_target(true)
        .try_init()
        .map_err(|e| InstrumentationError::config(format!("failed to install subscriber: {e}")))
}
