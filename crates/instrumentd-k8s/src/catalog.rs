//! Pod catalog.
//!
//! A read-only view of the pods scheduled on this node, with the language and
//! SDK the runtime detector assigned to each container. The agent keeps it
//! filled from its pod watch; tests and the demo use [`InMemoryPodCatalog`].

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use instrumentd_core::{
    InstrumentationError, OtelSdk, PodRef, PodWorkload, ProgrammingLanguage, Result, WorkloadKind,
};

/// The controller that owns a pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    /// Kubernetes kind, e.g. `ReplicaSet`.
    pub kind: String,
    /// Object name.
    pub name: String,
}

impl OwnerReference {
    /// Creates an owner reference.
    #[must_use]
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

/// A container and what the runtime detector found in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Container name from the pod spec.
    pub name: String,
    /// Detected language, if any.
    pub language: Option<ProgrammingLanguage>,
    /// SDK selected for the language, if any.
    pub sdk: Option<OtelSdk>,
}

impl ContainerInfo {
    /// A container with nothing detected yet.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            language: None,
            sdk: None,
        }
    }

    /// Sets the detected language and SDK.
    #[must_use]
    pub fn detected(mut self, language: ProgrammingLanguage, sdk: OtelSdk) -> Self {
        self.language = Some(language);
        self.sdk = Some(sdk);
        self
    }
}

/// A pod as seen by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodInfo {
    /// Pod namespace.
    pub namespace: String,
    /// Pod name.
    pub name: String,
    /// Controlling owner; `None` for bare pods.
    pub owner: Option<OwnerReference>,
    /// Containers in spec order.
    pub containers: Vec<ContainerInfo>,
}

impl PodInfo {
    /// Creates a pod with no owner and no containers.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            owner: None,
            containers: Vec::new(),
        }
    }

    /// Sets the controlling owner.
    #[must_use]
    pub fn owned_by(mut self, kind: impl Into<String>, name: impl Into<String>) -> Self {
        self.owner = Some(OwnerReference::new(kind, name));
        self
    }

    /// Adds a container.
    #[must_use]
    pub fn with_container(mut self, container: ContainerInfo) -> Self {
        self.containers.push(container);
        self
    }

    /// Pod reference.
    #[must_use]
    pub fn pod_ref(&self) -> PodRef {
        PodRef::new(self.namespace.clone(), self.name.clone())
    }

    /// Looks up a container by name.
    #[must_use]
    pub fn container(&self, name: &str) -> Option<&ContainerInfo> {
        self.containers.iter().find(|c| c.name == name)
    }

    /// Resolves the workload that owns this pod.
    ///
    /// A ReplicaSet named `<deployment>-<hash>` resolves to the Deployment.
    /// Other supported controllers resolve to themselves. A pod without an
    /// owner is its own workload.
    ///
    /// # Errors
    /// Returns [`InstrumentationError::Resolve`] for unsupported owner kinds
    /// or a ReplicaSet name without a hash suffix.
    pub fn workload(&self) -> Result<PodWorkload> {
        let Some(owner) = &self.owner else {
            return Ok(PodWorkload::new(
                self.namespace.clone(),
                WorkloadKind::Pod,
                self.name.clone(),
            ));
        };

        if owner.kind == "ReplicaSet" {
            let (deployment, _hash) = owner.name.rsplit_once('-').ok_or_else(|| {
                InstrumentationError::resolve(format!(
                    "replicaset {} has no pod-template-hash suffix",
                    owner.name
                ))
            })?;
            return Ok(PodWorkload::new(
                self.namespace.clone(),
                WorkloadKind::Deployment,
                deployment,
            ));
        }

        let kind = WorkloadKind::parse(&owner.kind).ok_or_else(|| {
            InstrumentationError::resolve(format!("unsupported owner kind {}", owner.kind))
        })?;
        Ok(PodWorkload::new(self.namespace.clone(), kind, owner.name.clone()))
    }
}

/// Pod lookup by namespace and name.
#[async_trait]
pub trait PodCatalog: Send + Sync + 'static {
    /// Returns the pod, or `None` if it is not known.
    ///
    /// # Errors
    /// Returns an error if the lookup itself failed.
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<PodInfo>>;
}

/// Catalog held in memory.
#[derive(Debug, Default)]
pub struct InMemoryPodCatalog {
    pods: RwLock<HashMap<(String, String), PodInfo>>,
}

impl InMemoryPodCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a pod.
    pub fn upsert(&self, pod: PodInfo) {
        self.pods
            .write()
            .insert((pod.namespace.clone(), pod.name.clone()), pod);
    }

    /// Removes a pod. Returns the removed entry.
    pub fn remove(&self, namespace: &str, name: &str) -> Option<PodInfo> {
        self.pods
            .write()
            .remove(&(namespace.to_string(), name.to_string()))
    }

    /// Number of pods known.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pods.read().len()
    }

    /// Returns true if no pods are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pods.read().is_empty()
    }
}

#[async_trait]
impl PodCatalog for InMemoryPodCatalog {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<PodInfo>> {
        Ok(self
            .pods
            .read()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replicaset_owner_resolves_to_deployment() {
        let pod = PodInfo::new("shop", "cart-7d9f8b6c4-x2x7q").owned_by("ReplicaSet", "cart-7d9f8b6c4");
        let w = pod.workload().unwrap();
        assert_eq!(w.kind, WorkloadKind::Deployment);
        assert_eq!(w.name, "cart");
        assert_eq!(w.namespace, "shop");
    }

    #[test]
    fn test_dashed_deployment_name_keeps_prefix() {
        let pod = PodInfo::new("shop", "p").owned_by("ReplicaSet", "checkout-api-5c8d7f");
        assert_eq!(pod.workload().unwrap().name, "checkout-api");
    }

    #[test]
    fn test_controllers_map_through() {
        for (kind, expected) in [
            ("StatefulSet", WorkloadKind::StatefulSet),
            ("DaemonSet", WorkloadKind::DaemonSet),
            ("Job", WorkloadKind::Job),
            ("CronJob", WorkloadKind::CronJob),
        ] {
            let pod = PodInfo::new("ns", "p").owned_by(kind, "owner");
            let w = pod.workload().unwrap();
            assert_eq!(w.kind, expected);
            assert_eq!(w.name, "owner");
        }
    }

    #[test]
    fn test_cron_spawned_job_stays_job() {
        let pod = PodInfo::new("ns", "p").owned_by("Job", "nightly-28391040");
        let w = pod.workload().unwrap();
        assert_eq!(w.kind, WorkloadKind::Job);
        assert_eq!(w.name, "nightly-28391040");
    }

    #[test]
    fn test_bare_pod_is_own_workload() {
        let w = PodInfo::new("ns", "debug").workload().unwrap();
        assert_eq!(w.kind, WorkloadKind::Pod);
        assert_eq!(w.name, "debug");
    }

    #[test]
    fn test_unsupported_owner_is_resolve_error() {
        let pod = PodInfo::new("ns", "p").owned_by("Rollout", "canary");
        assert!(matches!(pod.workload(), Err(InstrumentationError::Resolve(_))));

        let pod = PodInfo::new("ns", "p").owned_by("ReplicaSet", "nohash");
        assert!(matches!(pod.workload(), Err(InstrumentationError::Resolve(_))));
    }

    #[tokio::test]
    async fn test_in_memory_catalog() {
        let catalog = InMemoryPodCatalog::new();
        assert!(catalog.is_empty());
        catalog.upsert(PodInfo::new("ns", "a").with_container(ContainerInfo::new("app")));

        let pod = catalog.get_pod("ns", "a").await.unwrap().unwrap();
        assert!(pod.container("app").is_some());
        assert!(pod.container("other").is_none());
        assert!(catalog.get_pod("other", "a").await.unwrap().is_none());

        assert!(catalog.remove("ns", "a").is_some());
        assert!(catalog.get_pod("ns", "a").await.unwrap().is_none());
    }
}
