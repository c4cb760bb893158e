//! Agent configuration types.
//!
//! Configuration is validated at load time, with sensible defaults and
//! clear error messages.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{InstrumentationError, Result};

/// Node agent configuration.
///
/// # Toyota Way: Standardized Work (標準作業)
/// Every agent reads the same configuration contract regardless of which
/// instrumentation factories are registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Name of the node this agent runs on.
    #[serde(default)]
    pub node_name: String,

    /// Capacity of the process-event channel between detector and manager.
    #[serde(default = "default_process_event_buffer")]
    pub process_event_buffer: usize,

    /// Capacity of the config-update channel.
    #[serde(default = "default_config_update_buffer")]
    pub config_update_buffer: usize,

    /// Upper bound on a single instrumentation `close`.
    #[serde(default = "default_close_timeout")]
    #[serde(with = "humantime_serde")]
    pub close_timeout: Duration,

    /// Default `tracing` filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_process_event_buffer() -> usize {
    1024
}

fn default_config_update_buffer() -> usize {
    64
}

fn default_close_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            process_event_buffer: default_process_event_buffer(),
            config_update_buffer: default_config_update_buffer(),
            close_timeout: default_close_timeout(),
            log_filter: default_log_filter(),
        }
    }
}

impl AgentConfig {
    /// Creates a configuration for a node with default settings.
    #[must_use]
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            ..Self::default()
        }
    }

    /// Sets the close timeout.
    #[must_use]
    pub const fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.process_event_buffer == 0 {
            return Err(InstrumentationError::config(
                "process_event_buffer must be greater than zero",
            ));
        }
        if self.config_update_buffer == 0 {
            return Err(InstrumentationError::config(
                "config_update_buffer must be greater than zero",
            ));
        }
        if self.close_timeout.is_zero() {
            return Err(InstrumentationError::config(
                "close_timeout must be greater than zero",
            ));
        }
        if self.log_filter.trim().is_empty() {
            return Err(InstrumentationError::config("log_filter cannot be empty"));
        }
        Ok(())
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    /// Returns an error if the text cannot be parsed or is invalid.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| InstrumentationError::config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| InstrumentationError::config(format!("failed to read config: {e}")))?;
        Self::from_toml(&content)
    }
}

/// Serde helper for humantime durations.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serializes a duration as a human-readable string.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    /// Deserializes a duration from a human-readable string.
    ///
    /// # Errors
    /// Returns an error if the string cannot be parsed.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
