//! Error types for instrumentd-core.
//!
//! Every failure mode of the lifecycle is an explicit variant. The manager
//! decides per variant whether it is an expected miss, a loggable failure,
//! or something to report to the status store.

use std::fmt;
use std::time::Duration;

use crate::types::{Distribution, Pid};

/// Result type alias for instrumentation operations.
pub type Result<T> = std::result::Result<T, InstrumentationError>;

/// Error type covering the instrumentation lifecycle.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InstrumentationError {
    /// A required identifying environment variable was absent from the event.
    #[error("missing {0} in process environment")]
    MissingEnv(&'static str),

    /// Process details could not be resolved (e.g. pod lookup failed).
    #[error("failed to resolve process details: {0}")]
    Resolve(String),

    /// The container named by the process is not part of its pod.
    #[error("container {0} not found in pod spec")]
    ContainerNotInPod(String),

    /// Language/SDK could not be determined. Expected for unsupported runtimes.
    #[error("otel distribution not determinable: {0}")]
    DistributionUndetermined(String),

    /// The process language differs from the container's distribution
    /// (e.g. a shell script launching the real application).
    #[error("process language does not match the distribution determined for instrumentation")]
    LanguageMismatch,

    /// No factory registered for the distribution. Expected, not a failure.
    #[error("no instrumentation factory for {0}")]
    NoFactory(Distribution),

    /// Settings could not be read from the declarative config source.
    #[error("failed to get settings: {0}")]
    Settings(String),

    /// The factory failed to create the instrumentation.
    #[error("initialization failed: {0}")]
    Init(String),

    /// Load (probe attachment) failed.
    #[error("load failed: {0}")]
    Load(String),

    /// Run ended with a fatal error.
    #[error("run failed: {0}")]
    Run(String),

    /// Close failed.
    #[error("close failed: {0}")]
    Close(String),

    /// Close did not finish within the configured bound.
    #[error("close timed out after {0:?}")]
    CloseTimeout(Duration),

    /// One or more instrumentations in a config group rejected a config.
    #[error("{0}")]
    ApplyConfig(ApplyFailures),

    /// Status store write or delete failed.
    #[error("status store error: {0}")]
    Status(String),

    /// The instrumentation stopped because it was cancelled.
    #[error("instrumentation cancelled")]
    Cancelled,

    /// A deadline elapsed before the operation completed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid agent or manager configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A channel peer went away.
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// The process event source failed.
    #[error("process detector failed: {0}")]
    Detector(String),
}

impl InstrumentationError {
    /// Creates a resolution error.
    #[must_use]
    pub fn resolve(msg: impl Into<String>) -> Self {
        Self::Resolve(msg.into())
    }

    /// Creates an undetermined-distribution error.
    #[must_use]
    pub fn undetermined(msg: impl Into<String>) -> Self {
        Self::DistributionUndetermined(msg.into())
    }

    /// Creates a settings error.
    #[must_use]
    pub fn settings(msg: impl Into<String>) -> Self {
        Self::Settings(msg.into())
    }

    /// Creates an initialization error.
    #[must_use]
    pub fn init(msg: impl Into<String>) -> Self {
        Self::Init(msg.into())
    }

    /// Creates a load error.
    #[must_use]
    pub fn load(msg: impl Into<String>) -> Self {
        Self::Load(msg.into())
    }

    /// Creates a run error.
    #[must_use]
    pub fn run(msg: impl Into<String>) -> Self {
        Self::Run(msg.into())
    }

    /// Creates a close error.
    #[must_use]
    pub fn close(msg: impl Into<String>) -> Self {
        Self::Close(msg.into())
    }

    /// Creates a status store error.
    #[must_use]
    pub fn status(msg: impl Into<String>) -> Self {
        Self::Status(msg.into())
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Returns true for outcomes that are not failures: unsupported
    /// languages, missing factories, mismatched child processes.
    #[must_use]
    pub const fn is_expected_miss(&self) -> bool {
        matches!(
            self,
            Self::DistributionUndetermined(_) | Self::NoFactory(_) | Self::LanguageMismatch
        )
    }

    /// Returns true if this error only signals an intentional stop.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Aggregated `ApplyConfig` failures for one config group.
///
/// Delivery continues past individual failures, so the batch keeps every
/// `(pid, error)` pair instead of the first one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyFailures {
    failures: Vec<(Pid, String)>,
}

impl ApplyFailures {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure for a pid.
    pub fn push(&mut self, pid: Pid, err: &InstrumentationError) {
        self.failures.push((pid, err.to_string()));
    }

    /// Returns true if no failure was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of failed pids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Pids that failed, in delivery order.
    pub fn pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.failures.iter().map(|(pid, _)| *pid)
    }

    /// Converts into a result: `Ok` when nothing failed.
    ///
    /// # Errors
    /// Returns [`InstrumentationError::ApplyConfig`] carrying the batch.
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(InstrumentationError::ApplyConfig(self))
        }
    }
}

impl fmt::Display for ApplyFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to apply config to {} instrumentation(s)",
            self.failures.len()
        )?;
        for (pid, msg) in &self.failures {
            write!(f, "; pid {pid}: {msg}")?;
        }
        Ok(())
    }
}
