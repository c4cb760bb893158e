//! Test harness for manager lifecycle testing.
//!
//! Wires an [`InstrumentationManager`] to mock capabilities and keeps
//! handles to them so tests can observe every side effect.

use std::sync::Arc;
use std::time::Duration;

use crate::config::AgentConfig;
use crate::detector::TrackedPids;
use crate::manager::{InstrumentationManager, ManagerBuilder};
use crate::request::{RequestSender, request_channel};
use crate::tests::mocks::{
    CONTAINER_KEY, ContainerMatcher, EnvResolver, GO_EBPF, JAVA_EBPF, MockFactory,
    NAMESPACE_KEY, POD_KEY, RecordingReporter, StaticSettings, WORKLOAD_KEY,
};
use crate::types::{
    ConfigGroup, Pid, PodRef, PodWorkload, ProcessDetails, ProcessEvent, ProcessGroup,
    ProgrammingLanguage, WorkloadKind,
};
use crate::update::ConfigUpdateSender;

/// Namespace used by harness events.
pub const NAMESPACE: &str = "default";
/// Container that matches the Go distribution.
pub const GO_CONTAINER: &str = "go-app";
/// Container that matches the Java distribution (no factory registered).
pub const JAVA_CONTAINER: &str = "java-app";
/// Container whose language cannot be determined.
pub const UNKNOWN_CONTAINER: &str = "sidecar";
/// Container whose process is a launcher for another language.
pub const LAUNCHER_CONTAINER: &str = "launcher";

/// Test harness for manager tests.
///
/// Provides:
/// - A manager wired to mocks, with a Go factory registered
/// - Handles to the factory, reporter and request tracker
/// - Event builders and a bounded wait helper
pub struct TestHarness {
    /// Manager under test.
    pub manager: InstrumentationManager,
    /// Sender for config updates.
    pub updates: ConfigUpdateSender,
    /// Go factory handle.
    pub factory: MockFactory,
    /// Reporter handle.
    pub reporter: RecordingReporter,
    /// Pids handed to the tracker by explicit requests.
    pub tracked: Arc<TrackedPids>,
    timeout: Duration,
}

impl TestHarness {
    /// Creates a harness with default mocks.
    #[must_use]
    pub fn new() -> Self {
        Self::with_parts(MockFactory::new(), RecordingReporter::new(), StaticSettings::new())
    }

    /// Creates a harness with a custom factory.
    #[must_use]
    pub fn with_factory(factory: MockFactory) -> Self {
        Self::with_parts(factory, RecordingReporter::new(), StaticSettings::new())
    }

    /// Creates a harness from explicit parts.
    #[must_use]
    pub fn with_parts(
        factory: MockFactory,
        reporter: RecordingReporter,
        settings: StaticSettings,
    ) -> Self {
        Self::build(
            ManagerBuilder::new().with_settings_getter(Arc::new(settings)),
            factory,
            reporter,
            AgentConfig::new("test-node").with_close_timeout(Duration::from_millis(200)),
        )
    }

    /// Creates a harness accepting explicit requests.
    #[must_use]
    pub fn with_requests(factory: MockFactory) -> (Self, RequestSender) {
        let (tx, rx) = request_channel(8);
        let harness = Self::build(
            ManagerBuilder::new()
                .with_settings_getter(Arc::new(StaticSettings::new()))
                .with_requests(rx),
            factory,
            RecordingReporter::new(),
            AgentConfig::new("test-node").with_close_timeout(Duration::from_millis(200)),
        );
        (harness, tx)
    }

    /// Creates a harness with a custom agent config.
    #[must_use]
    pub fn with_config(config: AgentConfig) -> Self {
        Self::build(
            ManagerBuilder::new().with_settings_getter(Arc::new(StaticSettings::new())),
            MockFactory::new(),
            RecordingReporter::new(),
            config,
        )
    }

    fn build(
        builder: ManagerBuilder,
        factory: MockFactory,
        reporter: RecordingReporter,
        config: AgentConfig,
    ) -> Self {
        let matcher = ContainerMatcher::new()
            .with_container(GO_CONTAINER, GO_EBPF)
            .with_container(JAVA_CONTAINER, JAVA_EBPF)
            .mismatched(LAUNCHER_CONTAINER);

        let tracked = Arc::new(TrackedPids::default());
        let (manager, updates) = builder
            .with_config(config)
            .with_tracker(tracked.clone())
            .with_details_resolver(Arc::new(EnvResolver))
            .with_distribution_matcher(Arc::new(matcher))
            .with_reporter(Arc::new(reporter.clone()))
            .with_factory(GO_EBPF, Arc::new(factory.clone()))
            .build()
            .expect("harness manager should build");

        Self {
            manager,
            updates,
            factory,
            reporter,
            tracked,
            timeout: Duration::from_secs(5),
        }
    }

    /// Exec event for a pod of `deployment` running `container`.
    #[must_use]
    pub fn exec(pid: u32, pod: &str, deployment: &str, container: &str) -> ProcessEvent {
        ProcessEvent::exec(Pid::new(pid), format!("/app/{container}"))
            .with_env(POD_KEY, pod)
            .with_env(NAMESPACE_KEY, NAMESPACE)
            .with_env(CONTAINER_KEY, container)
            .with_env(WORKLOAD_KEY, deployment)
    }

    /// Exec event for a Go process in deployment `deployment`.
    #[must_use]
    pub fn go_exec(pid: u32, deployment: &str) -> ProcessEvent {
        Self::exec(pid, &format!("{deployment}-pod-{pid}"), deployment, GO_CONTAINER)
    }

    /// Pre-resolved details of the process [`Self::exec`] describes.
    #[must_use]
    pub fn details(pid: u32, pod: &str, deployment: &str, container: &str) -> ProcessDetails {
        ProcessDetails::new(
            PodRef::new(NAMESPACE, pod),
            container,
            Self::deployment(deployment),
        )
        .with_process(&Self::exec(pid, pod, deployment, container))
    }

    /// Process group of a container in a harness pod.
    #[must_use]
    pub fn process_group(pod: &str, container: &str) -> ProcessGroup {
        ProcessGroup::new(PodRef::new(NAMESPACE, pod), container)
    }

    /// Workload reference for a deployment in the harness namespace.
    #[must_use]
    pub fn deployment(name: &str) -> PodWorkload {
        PodWorkload::new(NAMESPACE, WorkloadKind::Deployment, name)
    }

    /// Go config group of a deployment.
    #[must_use]
    pub fn go_group(deployment: &str) -> ConfigGroup {
        ConfigGroup::new(Self::deployment(deployment), ProgrammingLanguage::Go)
    }

    /// Default wait timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Waits until `cond` holds, polling every few milliseconds.
    ///
    /// # Errors
    /// Returns [`TestError::Timeout`] if the condition never holds.
    pub async fn wait_for<F>(&self, mut cond: F) -> Result<(), TestError>
    where
        F: FnMut() -> bool,
    {
        tokio::time::timeout(self.timeout, async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .map_err(|_| TestError::Timeout(self.timeout))
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Test error type.
#[derive(Debug, thiserror::Error)]
pub enum TestError {
    /// Test timed out.
    #[error("test timed out after {0:?}")]
    Timeout(Duration),

    /// Instrumentation error.
    #[error("instrumentation error: {0}")]
    Instrumentation(#[from] crate::error::InstrumentationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harness_creation() {
        let harness = TestHarness::new();
        assert!(harness.manager.tracked_pids().is_empty());
        assert_eq!(harness.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_exec_event_carries_identity() {
        let ev = TestHarness::go_exec(7, "api");
        assert_eq!(ev.environment.get(POD_KEY).map(String::as_str), Some("api-pod-7"));
        assert_eq!(ev.environment.get(CONTAINER_KEY).map(String::as_str), Some(GO_CONTAINER));
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let mut harness = TestHarness::new();
        harness.timeout = Duration::from_millis(20);
        let result = harness.wait_for(|| false).await;
        assert!(matches!(result, Err(TestError::Timeout(_))));
    }

    #[test]
    fn test_error_display() {
        let err = TestError::Timeout(Duration::from_secs(30));
        assert!(err.to_string().contains("30"));
    }
}
