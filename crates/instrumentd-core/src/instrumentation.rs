//! Per-process instrumentation contract and the factory registry.
//!
//! # Toyota Way: Standardized Work (標準作業)
//! Every language/SDK implementation follows the same lifecycle contract,
//! so the manager drives all of them identically.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{InstrumentationError, Result};
use crate::types::{Distribution, Pid, SdkConfig, Settings};

/// A per-process instrumentation object.
///
/// # Lifecycle
///
/// ```text
/// Created ──load──→ Loaded ──run──→ Running ──close──→ Closed
/// ```
///
/// 1. **load**: attach probes. On failure nothing may be left attached.
///    Called exactly once, before the instrumentation is shared.
///
/// 2. **run**: blocks until the instrumentation is closed or hits a fatal
///    error. Once `cancel` fires it must return promptly, and returning
///    [`InstrumentationError::Cancelled`] or `Ok(())` both count as a clean
///    stop.
///
/// 3. **close**: releases everything. Callable from any state and safe to
///    call more than once.
///
/// 4. **apply_config**: meaningful once running; may be called concurrently
///    with `run`.
#[async_trait]
pub trait Instrumentation: Send + Sync + 'static {
    /// Loads the instrumentation into the target process.
    ///
    /// # Errors
    /// Returns an error if probes cannot be attached.
    async fn load(&mut self) -> Result<()>;

    /// Runs until cancelled, closed or a fatal error occurs.
    ///
    /// # Errors
    /// Returns an error on a fatal runtime failure.
    async fn run(&self, cancel: CancellationToken) -> Result<()>;

    /// Closes the instrumentation. Idempotent.
    ///
    /// # Errors
    /// Returns an error if resources could not be released cleanly.
    async fn close(&self) -> Result<()>;

    /// Applies a new SDK configuration to a running instrumentation.
    ///
    /// # Errors
    /// Returns an error if the configuration is rejected.
    async fn apply_config(&self, config: &SdkConfig) -> Result<()>;
}

/// Builds instrumentations for one distribution.
#[async_trait]
pub trait Factory: Send + Sync + 'static {
    /// Creates an instrumentation for `pid` with the given settings.
    ///
    /// # Errors
    /// Returns an error if the instrumentation cannot be constructed.
    async fn create(&self, pid: Pid, settings: Settings) -> Result<Box<dyn Instrumentation>>;
}

/// Static map from distribution to factory, fixed at startup.
#[derive(Clone, Default)]
pub struct FactoryRegistry {
    factories: HashMap<Distribution, Arc<dyn Factory>>,
}

impl FactoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory, replacing any existing one for the distribution.
    #[must_use]
    pub fn with(mut self, distribution: Distribution, factory: Arc<dyn Factory>) -> Self {
        self.register(distribution, factory);
        self
    }

    /// Registers a factory in place.
    pub fn register(&mut self, distribution: Distribution, factory: Arc<dyn Factory>) {
        if self.factories.insert(distribution, factory).is_some() {
            tracing::warn!(%distribution, "replacing registered instrumentation factory");
        }
    }

    /// Looks up the factory for a distribution.
    ///
    /// # Errors
    /// Returns [`InstrumentationError::NoFactory`] if none is registered.
    /// That is an expected outcome, not a failure.
    pub fn lookup(&self, distribution: &Distribution) -> Result<Arc<dyn Factory>> {
        self.factories
            .get(distribution)
            .cloned()
            .ok_or(InstrumentationError::NoFactory(*distribution))
    }

    /// Number of registered factories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Returns true if no factory is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Registered distributions.
    pub fn distributions(&self) -> impl Iterator<Item = &Distribution> {
        self.factories.keys()
    }
}

impl std::fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryRegistry")
            .field("distributions", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
