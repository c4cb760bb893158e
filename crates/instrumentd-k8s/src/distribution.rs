//! Distribution matching from per-container runtime detection.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use instrumentd_core::{
    Distribution, DistributionMatcher, InstrumentationError, ProcessDetails, Result,
};

use crate::catalog::PodCatalog;

/// Interpreters commonly used as entrypoint wrappers. A process started
/// through one of them is the launcher, not the detected application.
const SHELLS: [&str; 5] = ["sh", "bash", "dash", "ash", "zsh"];

/// Matches a process to the language and SDK detected for its container.
pub struct ContainerDistributionMatcher {
    catalog: Arc<dyn PodCatalog>,
}

impl ContainerDistributionMatcher {
    /// Creates a matcher backed by `catalog`.
    #[must_use]
    pub fn new(catalog: Arc<dyn PodCatalog>) -> Self {
        Self { catalog }
    }
}

fn is_shell_launcher(cmdline: &str) -> bool {
    cmdline
        .split_whitespace()
        .next()
        .and_then(|argv0| Path::new(argv0).file_name())
        .and_then(|name| name.to_str())
        .is_some_and(|name| SHELLS.contains(&name))
}

#[async_trait]
impl DistributionMatcher for ContainerDistributionMatcher {
    async fn match_distribution(&self, details: &ProcessDetails) -> Result<Distribution> {
        let pod = self
            .catalog
            .get_pod(&details.pod.namespace, &details.pod.name)
            .await?
            .ok_or_else(|| InstrumentationError::resolve(format!("pod {} not found", details.pod)))?;

        let container = pod
            .container(&details.container_name)
            .ok_or_else(|| InstrumentationError::ContainerNotInPod(details.container_name.clone()))?;

        let (Some(language), Some(sdk)) = (container.language, container.sdk) else {
            return Err(InstrumentationError::undetermined(format!(
                "no language detected for container {}",
                container.name
            )));
        };

        if is_shell_launcher(&details.cmdline) {
            return Err(InstrumentationError::LanguageMismatch);
        }

        Ok(Distribution::new(language, sdk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ContainerInfo, InMemoryPodCatalog, PodInfo};
    use instrumentd_core::{OtelSdk, PodRef, PodWorkload, ProgrammingLanguage, WorkloadKind};

    fn matcher() -> ContainerDistributionMatcher {
        let catalog = InMemoryPodCatalog::new();
        catalog.upsert(
            PodInfo::new("ns", "p")
                .with_container(
                    ContainerInfo::new("go").detected(ProgrammingLanguage::Go, OtelSdk::EBPF_COMMUNITY),
                )
                .with_container(ContainerInfo::new("unknown")),
        );
        ContainerDistributionMatcher::new(Arc::new(catalog))
    }

    fn details(container: &str, cmdline: &str) -> ProcessDetails {
        let mut d = ProcessDetails::new(
            PodRef::new("ns", "p"),
            container,
            PodWorkload::new("ns", WorkloadKind::Pod, "p"),
        );
        d.cmdline = cmdline.into();
        d
    }

    #[tokio::test]
    async fn test_matches_detected_container() {
        let dist = matcher().match_distribution(&details("go", "/app/server")).await.unwrap();
        assert_eq!(dist, Distribution::new(ProgrammingLanguage::Go, OtelSdk::EBPF_COMMUNITY));
    }

    #[tokio::test]
    async fn test_unknown_container() {
        let err = matcher().match_distribution(&details("sidecar", "")).await.unwrap_err();
        assert!(matches!(err, InstrumentationError::ContainerNotInPod(c) if c == "sidecar"));
    }

    #[tokio::test]
    async fn test_nothing_detected_is_expected_miss() {
        let err = matcher().match_distribution(&details("unknown", "")).await.unwrap_err();
        assert!(err.is_expected_miss());
    }

    #[tokio::test]
    async fn test_shell_launcher_is_mismatch() {
        let err = matcher()
            .match_distribution(&details("go", "/bin/sh -c /app/server"))
            .await
            .unwrap_err();
        assert!(matches!(err, InstrumentationError::LanguageMismatch));
    }

    #[test]
    fn test_shell_detection() {
        assert!(is_shell_launcher("bash entrypoint.sh"));
        assert!(is_shell_launcher("/usr/bin/dash"));
        assert!(!is_shell_launcher("/app/bashful"));
        assert!(!is_shell_launcher(""));
    }
}
