//! Lifecycle reporting contract.
//!
//! The manager externalizes init/load/run/exit transitions through a
//! [`Reporter`]. Reporter failures are logged by the caller and never roll
//! back or block the lifecycle action that produced them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{InstrumentationError, Result};
use crate::types::{Pid, ProcessDetails};

/// Reason recorded alongside a health transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusReason {
    /// The factory failed to create the instrumentation.
    FailedToInitialize,
    /// Probes failed to load.
    FailedToLoad,
    /// Probes loaded and the instrumentation is running.
    LoadedSuccessfully,
    /// Run ended with a fatal error.
    FailedToRun,
}

impl StatusReason {
    /// Returns the reason name as written to status records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FailedToInitialize => "FailedToInitialize",
            Self::FailedToLoad => "FailedToLoad",
            Self::LoadedSuccessfully => "LoadedSuccessfully",
            Self::FailedToRun => "FailedToRun",
        }
    }

    /// Returns true if the reason describes a healthy instrumentation.
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::LoadedSuccessfully)
    }
}

impl std::fmt::Display for StatusReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externalizes lifecycle transitions as health records.
///
/// Writes must be idempotent: a create that finds an existing record
/// updates it, and a delete of a missing record succeeds.
#[async_trait]
pub trait Reporter: Send + Sync + 'static {
    /// Called after `Factory::create`. `err` is set when creation failed.
    ///
    /// # Errors
    /// Returns an error if the status write failed.
    async fn on_init(
        &self,
        pid: Pid,
        details: &ProcessDetails,
        err: Option<&InstrumentationError>,
    ) -> Result<()>;

    /// Called after `Instrumentation::load`.
    ///
    /// # Errors
    /// Returns an error if the status write failed.
    async fn on_load(
        &self,
        pid: Pid,
        details: &ProcessDetails,
        err: Option<&InstrumentationError>,
    ) -> Result<()>;

    /// Called from the run task when `run` ended with a real failure.
    ///
    /// # Errors
    /// Returns an error if the status write failed.
    async fn on_run(
        &self,
        pid: Pid,
        details: &ProcessDetails,
        err: Option<&InstrumentationError>,
    ) -> Result<()>;

    /// Called when the process exits. Deletes the record.
    ///
    /// # Errors
    /// Returns an error if the delete failed for a reason other than absence.
    async fn on_exit(&self, pid: Pid, details: &ProcessDetails) -> Result<()>;
}

/// Reporter that only logs transitions. Useful when no status store is wired.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

#[async_trait]
impl Reporter for LogReporter {
    async fn on_init(
        &self,
        pid: Pid,
        details: &ProcessDetails,
        err: Option<&InstrumentationError>,
    ) -> Result<()> {
        if let Some(err) = err {
            tracing::info!(%pid, pod = %details.pod, reason = %StatusReason::FailedToInitialize, error = %err, "instrumentation status");
        }
        Ok(())
    }

    async fn on_load(
        &self,
        pid: Pid,
        details: &ProcessDetails,
        err: Option<&InstrumentationError>,
    ) -> Result<()> {
        match err {
            Some(err) => {
                tracing::info!(%pid, pod = %details.pod, reason = %StatusReason::FailedToLoad, error = %err, "instrumentation status");
            }
            None => {
                tracing::info!(%pid, pod = %details.pod, reason = %StatusReason::LoadedSuccessfully, "instrumentation status");
            }
        }
        Ok(())
    }

    async fn on_run(
        &self,
        pid: Pid,
        details: &ProcessDetails,
        err: Option<&InstrumentationError>,
    ) -> Result<()> {
        if let Some(err) = err {
            tracing::info!(%pid, pod = %details.pod, reason = %StatusReason::FailedToRun, error = %err, "instrumentation status");
        }
        Ok(())
    }

    async fn on_exit(&self, pid: Pid, details: &ProcessDetails) -> Result<()> {
        tracing::info!(%pid, pod = %details.pod, "instrumentation status removed");
        Ok(())
    }
}
