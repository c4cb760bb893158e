//! Declarative settings for new instrumentations.
//!
//! The per-workload instrumentation config names an optional service name
//! and one [`SdkConfig`] per language. Resource attributes are derived from
//! the process identity and merged with whatever the process already
//! declares in `OTEL_RESOURCE_ATTRIBUTES`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use opentelemetry::KeyValue;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use instrumentd_core::resource::identity_attributes;
use instrumentd_core::{
    Distribution, InstrumentationError, Pid, PodWorkload, ProcessDetails, ProgrammingLanguage,
    Result, SdkConfig, Settings, SettingsGetter,
};

use crate::env;

/// Instrumentation config declared for one workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Service name override. The workload name is used when absent.
    #[serde(default)]
    pub service_name: Option<String>,
    /// SDK configs, at most one per language.
    #[serde(default)]
    pub sdk_configs: Vec<SdkConfig>,
}

impl WorkloadConfig {
    /// Empty config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the service name.
    #[must_use]
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Adds an SDK config.
    #[must_use]
    pub fn with_sdk_config(mut self, config: SdkConfig) -> Self {
        self.sdk_configs.push(config);
        self
    }

    /// The SDK config declared for `language`.
    #[must_use]
    pub fn for_language(&self, language: ProgrammingLanguage) -> Option<&SdkConfig> {
        self.sdk_configs
            .iter()
            .find(|c| c.language == Some(language))
    }
}

/// Source of per-workload instrumentation configs.
#[async_trait]
pub trait InstrumentationConfigSource: Send + Sync + 'static {
    /// Returns the config declared for `workload`, if any.
    ///
    /// # Errors
    /// Returns an error if the source could not be read.
    async fn workload_config(&self, workload: &PodWorkload) -> Result<Option<WorkloadConfig>>;
}

/// Config source held in memory, keyed by namespace and runtime object name.
#[derive(Debug, Default)]
pub struct InMemoryConfigSource {
    configs: RwLock<HashMap<(String, String), WorkloadConfig>>,
}

impl InMemoryConfigSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(workload: &PodWorkload) -> (String, String) {
        (workload.namespace.clone(), workload.runtime_object_name())
    }

    /// Declares or replaces the config for a workload.
    pub fn put(&self, workload: &PodWorkload, config: WorkloadConfig) {
        self.configs.write().insert(Self::key(workload), config);
    }

    /// Removes the config for a workload.
    pub fn remove(&self, workload: &PodWorkload) -> Option<WorkloadConfig> {
        self.configs.write().remove(&Self::key(workload))
    }
}

#[async_trait]
impl InstrumentationConfigSource for InMemoryConfigSource {
    async fn workload_config(&self, workload: &PodWorkload) -> Result<Option<WorkloadConfig>> {
        Ok(self.configs.read().get(&Self::key(workload)).cloned())
    }
}

/// Parses an `OTEL_RESOURCE_ATTRIBUTES` value.
///
/// Returns the parsed attributes and the pairs that were rejected. Empty
/// segments are ignored; pairs without `=` or with an empty key or value
/// are rejected.
#[must_use]
pub fn parse_resource_attributes(value: &str) -> (Vec<KeyValue>, Vec<String>) {
    let mut attrs = Vec::new();
    let mut rejected = Vec::new();

    for pair in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match pair.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() && !v.trim().is_empty() => {
                attrs.push(KeyValue::new(k.trim().to_string(), v.trim().to_string()));
            }
            _ => rejected.push(pair.to_string()),
        }
    }
    (attrs, rejected)
}

/// Appends attributes whose key is not already present.
pub fn append_unique(existing: &mut Vec<KeyValue>, extra: Vec<KeyValue>) {
    let mut seen: HashSet<String> = existing.iter().map(|kv| kv.key.as_str().to_string()).collect();
    for kv in extra {
        if seen.insert(kv.key.as_str().to_string()) {
            existing.push(kv);
        }
    }
}

/// Resource attributes for a process: identity first, then the process's
/// own `OTEL_RESOURCE_ATTRIBUTES` where they do not collide.
#[must_use]
pub fn resource_attributes(pid: Pid, details: &ProcessDetails) -> Vec<KeyValue> {
    let mut attrs = identity_attributes(pid, details);
    if let Some(declared) = details.environment.get(env::OTEL_RESOURCE_ATTRIBUTES) {
        let (parsed, rejected) = parse_resource_attributes(declared);
        if !rejected.is_empty() {
            tracing::warn!(
                %pid,
                pod = %details.pod,
                rejected = ?rejected,
                "skipping malformed resource attributes"
            );
        }
        append_unique(&mut attrs, parsed);
    }
    attrs
}

/// Settings getter reading an [`InstrumentationConfigSource`].
pub struct DeclarativeSettingsGetter {
    source: Arc<dyn InstrumentationConfigSource>,
}

impl DeclarativeSettingsGetter {
    /// Creates a getter over `source`.
    #[must_use]
    pub fn new(source: Arc<dyn InstrumentationConfigSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl SettingsGetter for DeclarativeSettingsGetter {
    async fn settings(
        &self,
        pid: Pid,
        details: &ProcessDetails,
        distribution: &Distribution,
    ) -> Result<Settings> {
        // A missing config is normal while a workload is being uninstrumented.
        let config = self
            .source
            .workload_config(&details.workload)
            .await?
            .ok_or_else(|| {
                InstrumentationError::settings(format!(
                    "no instrumentation config for {}",
                    details.workload
                ))
            })?;
        let sdk_config = config.for_language(distribution.language).ok_or_else(|| {
            InstrumentationError::settings(format!(
                "no sdk config found for language {}",
                distribution.language
            ))
        })?;

        let service_name = config
            .service_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| details.workload.name.clone());

        Ok(Settings {
            service_name,
            resource_attributes: resource_attributes(pid, details),
            initial_config: Some(sdk_config.clone()),
        })
    }
}
