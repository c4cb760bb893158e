//! Pluggable resolution capabilities.
//!
//! Each resolver is a narrow, stateless capability the manager invokes
//! inline while handling an exec event. Implementations live outside the
//! core (see `instrumentd-k8s`); tests use fixed doubles.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ConfigGroup, Distribution, Pid, ProcessDetails, ProcessEvent, Settings};

/// Resolves a process event to its pod, container and workload.
#[async_trait]
pub trait ProcessDetailsResolver: Send + Sync + 'static {
    /// Resolves the identity of the process behind `event`.
    ///
    /// # Errors
    /// Returns an error if an identifying environment key is missing or
    /// the pod cannot be looked up. Terminal for the event.
    async fn resolve(&self, event: &ProcessEvent) -> Result<ProcessDetails>;
}

/// Determines the language and SDK for a process.
#[async_trait]
pub trait DistributionMatcher: Send + Sync + 'static {
    /// Matches a distribution for the process.
    ///
    /// # Errors
    /// [`crate::InstrumentationError::DistributionUndetermined`] is the
    /// expected outcome for unsupported runtimes. Other errors are failures.
    async fn match_distribution(&self, details: &ProcessDetails) -> Result<Distribution>;
}

/// Computes the config group for a process.
pub trait ConfigGroupResolver: Send + Sync + 'static {
    /// Returns the group key the process's config updates are addressed to.
    fn resolve(&self, details: &ProcessDetails, distribution: &Distribution) -> ConfigGroup;
}

/// Reads creation settings from the declarative configuration.
#[async_trait]
pub trait SettingsGetter: Send + Sync + 'static {
    /// Returns settings for the process.
    ///
    /// # Errors
    /// Returns an error if no config is declared for the workload/language.
    async fn settings(
        &self,
        pid: Pid,
        details: &ProcessDetails,
        distribution: &Distribution,
    ) -> Result<Settings>;
}

/// Default grouping: one group per `(workload, language)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkloadLanguageGroups;

impl ConfigGroupResolver for WorkloadLanguageGroups {
    fn resolve(&self, details: &ProcessDetails, distribution: &Distribution) -> ConfigGroup {
        ConfigGroup::new(details.workload.clone(), distribution.language)
    }
}
