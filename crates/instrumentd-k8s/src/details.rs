//! Process details from the injected environment.

use std::sync::Arc;

use async_trait::async_trait;

use instrumentd_core::{
    InstrumentationError, ProcessDetails, ProcessDetailsResolver, ProcessEvent, Result,
};

use crate::catalog::PodCatalog;
use crate::env;

/// Resolves pod, container and workload from the `ODIGOS_*` variables of
/// the process, then the owning workload through the pod catalog.
pub struct EnvProcessDetailsResolver {
    catalog: Arc<dyn PodCatalog>,
}

impl EnvProcessDetailsResolver {
    /// Creates a resolver backed by `catalog`.
    #[must_use]
    pub fn new(catalog: Arc<dyn PodCatalog>) -> Self {
        Self { catalog }
    }
}

fn required<'a>(event: &'a ProcessEvent, key: &'static str) -> Result<&'a str> {
    event
        .environment
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or(InstrumentationError::MissingEnv(key))
}

#[async_trait]
impl ProcessDetailsResolver for EnvProcessDetailsResolver {
    async fn resolve(&self, event: &ProcessEvent) -> Result<ProcessDetails> {
        let pod_name = required(event, env::POD_NAME)?;
        let namespace = required(event, env::POD_NAMESPACE)?;
        let container = required(event, env::CONTAINER_NAME)?;

        let pod = self
            .catalog
            .get_pod(namespace, pod_name)
            .await?
            .ok_or_else(|| {
                InstrumentationError::resolve(format!("pod {namespace}/{pod_name} not found"))
            })?;
        let workload = pod.workload()?;

        Ok(ProcessDetails::new(pod.pod_ref(), container, workload).with_process(event))
    }
}
