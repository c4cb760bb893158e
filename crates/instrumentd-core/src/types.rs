//! Core types for the instrumentation lifecycle.
//!
//! Process identity, workload ownership, language/SDK distributions and the
//! per-instrumentation settings handed to factories. All keys used in the
//! manager's tables (`Pid`, `ConfigGroup`, `Distribution`) are small value
//! types with total equality.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Process identity
// =============================================================================

/// Operating-system process id of an instrumented process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pid(u32);

impl Pid {
    /// Wraps a raw pid.
    #[must_use]
    pub const fn new(pid: u32) -> Self {
        Self(pid)
    }

    /// Returns the raw pid.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for Pid {
    fn from(pid: u32) -> Self {
        Self(pid)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of process lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessEventKind {
    /// A process started (exec).
    Exec,
    /// A process exited.
    Exit,
}

/// A process start/stop signal from the detector. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEvent {
    /// Process id.
    pub pid: Pid,
    /// Exec or exit.
    pub kind: ProcessEventKind,
    /// Environment variables of the process (empty for exits).
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Command line as a single string.
    #[serde(default)]
    pub cmdline: String,
    /// Resolved executable path, if the detector provides one.
    #[serde(default)]
    pub exe_path: Option<String>,
}

impl ProcessEvent {
    /// Creates an exec event.
    #[must_use]
    pub fn exec(pid: Pid, cmdline: impl Into<String>) -> Self {
        Self {
            pid,
            kind: ProcessEventKind::Exec,
            environment: BTreeMap::new(),
            cmdline: cmdline.into(),
            exe_path: None,
        }
    }

    /// Creates an exit event.
    #[must_use]
    pub fn exit(pid: Pid) -> Self {
        Self {
            pid,
            kind: ProcessEventKind::Exit,
            environment: BTreeMap::new(),
            cmdline: String::new(),
            exe_path: None,
        }
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Sets the executable path.
    #[must_use]
    pub fn with_exe_path(mut self, path: impl Into<String>) -> Self {
        self.exe_path = Some(path.into());
        self
    }
}

// =============================================================================
// Workload identity
// =============================================================================

/// A pod reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PodRef {
    /// Pod name.
    pub name: String,
    /// Pod namespace.
    pub namespace: String,
}

impl PodRef {
    /// Creates a pod reference.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for PodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Kind of the workload owning a pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WorkloadKind {
    /// apps/v1 Deployment.
    Deployment,
    /// apps/v1 StatefulSet.
    StatefulSet,
    /// apps/v1 DaemonSet.
    DaemonSet,
    /// batch/v1 Job.
    Job,
    /// batch/v1 CronJob.
    CronJob,
    /// A bare pod with no controller.
    Pod,
}

impl WorkloadKind {
    /// Returns the Kubernetes kind name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deployment => "Deployment",
            Self::StatefulSet => "StatefulSet",
            Self::DaemonSet => "DaemonSet",
            Self::Job => "Job",
            Self::CronJob => "CronJob",
            Self::Pod => "Pod",
        }
    }

    /// Parses a Kubernetes kind name, case-insensitively.
    #[must_use]
    pub fn parse(kind: &str) -> Option<Self> {
        [
            Self::Deployment,
            Self::StatefulSet,
            Self::DaemonSet,
            Self::Job,
            Self::CronJob,
            Self::Pod,
        ]
        .into_iter()
        .find(|k| k.as_str().eq_ignore_ascii_case(kind))
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The workload owning a pod.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PodWorkload {
    /// Workload name.
    pub name: String,
    /// Workload namespace.
    pub namespace: String,
    /// Workload kind.
    pub kind: WorkloadKind,
}

impl PodWorkload {
    /// Creates a workload reference.
    #[must_use]
    pub fn new(namespace: impl Into<String>, kind: WorkloadKind, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            kind,
        }
    }

    /// Name of the per-workload runtime object: `"{kind-lowercase}-{name}"`.
    #[must_use]
    pub fn runtime_object_name(&self) -> String {
        format!("{}-{}", self.kind.as_str().to_ascii_lowercase(), self.name)
    }
}

impl fmt::Display for PodWorkload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.kind, self.name)
    }
}

/// Resolved identity of a process: pod, container and owning workload.
///
/// Derived per exec event; carries the event's environment and command
/// line so settings can derive process-level resource attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDetails {
    /// Owning pod.
    pub pod: PodRef,
    /// Container name within the pod.
    pub container_name: String,
    /// Owning workload.
    pub workload: PodWorkload,
    /// Command line of the process.
    #[serde(default)]
    pub cmdline: String,
    /// Environment of the process.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Executable path, when known.
    #[serde(default)]
    pub exe_path: Option<String>,
}

impl ProcessDetails {
    /// Creates details without process attributes.
    #[must_use]
    pub fn new(pod: PodRef, container_name: impl Into<String>, workload: PodWorkload) -> Self {
        Self {
            pod,
            container_name: container_name.into(),
            workload,
            cmdline: String::new(),
            environment: BTreeMap::new(),
            exe_path: None,
        }
    }

    /// Copies process attributes from the originating event.
    #[must_use]
    pub fn with_process(mut self, event: &ProcessEvent) -> Self {
        self.cmdline.clone_from(&event.cmdline);
        self.environment.clone_from(&event.environment);
        self.exe_path.clone_from(&event.exe_path);
        self
    }

    /// The process group this process belongs to.
    #[must_use]
    pub fn process_group(&self) -> ProcessGroup {
        ProcessGroup::new(self.pod.clone(), self.container_name.clone())
    }
}

// =============================================================================
// Distribution
// =============================================================================

/// Programming language of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgrammingLanguage {
    /// Go.
    Go,
    /// Java and other JVM languages.
    Java,
    /// Python.
    Python,
    /// JavaScript (Node.js).
    JavaScript,
    /// .NET.
    DotNet,
    /// PHP.
    Php,
    /// Ruby.
    Ruby,
    /// Rust.
    Rust,
    /// C/C++ and other native code.
    Cplusplus,
    /// Nginx.
    Nginx,
    /// MySQL.
    Mysql,
}

impl ProgrammingLanguage {
    /// Returns the canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Go => "go",
            Self::Java => "java",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::DotNet => "dotnet",
            Self::Php => "php",
            Self::Ruby => "ruby",
            Self::Rust => "rust",
            Self::Cplusplus => "cplusplus",
            Self::Nginx => "nginx",
            Self::Mysql => "mysql",
        }
    }
}

impl fmt::Display for ProgrammingLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the SDK is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdkType {
    /// In-process native SDK.
    Native,
    /// eBPF-based SDK driven by the node agent.
    Ebpf,
}

/// SDK distribution tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdkTier {
    /// Community (open-source) SDK.
    Community,
    /// Enterprise SDK.
    Enterprise,
}

/// An OpenTelemetry SDK flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OtelSdk {
    /// Delivery mechanism.
    pub sdk_type: SdkType,
    /// Tier.
    pub tier: SdkTier,
}

impl OtelSdk {
    /// Community native SDK.
    pub const NATIVE_COMMUNITY: Self = Self::new(SdkType::Native, SdkTier::Community);
    /// Community eBPF SDK.
    pub const EBPF_COMMUNITY: Self = Self::new(SdkType::Ebpf, SdkTier::Community);
    /// Enterprise native SDK.
    pub const NATIVE_ENTERPRISE: Self = Self::new(SdkType::Native, SdkTier::Enterprise);
    /// Enterprise eBPF SDK.
    pub const EBPF_ENTERPRISE: Self = Self::new(SdkType::Ebpf, SdkTier::Enterprise);

    /// Creates an SDK descriptor.
    #[must_use]
    pub const fn new(sdk_type: SdkType, tier: SdkTier) -> Self {
        Self { sdk_type, tier }
    }
}

impl fmt::Display for OtelSdk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ty = match self.sdk_type {
            SdkType::Native => "native",
            SdkType::Ebpf => "ebpf",
        };
        let tier = match self.tier {
            SdkTier::Community => "community",
            SdkTier::Enterprise => "enterprise",
        };
        write!(f, "{ty}/{tier}")
    }
}

/// Language and SDK pair. Selects the factory for a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Distribution {
    /// Programming language.
    pub language: ProgrammingLanguage,
    /// SDK flavor.
    pub sdk: OtelSdk,
}

impl Distribution {
    /// Creates a distribution key.
    #[must_use]
    pub const fn new(language: ProgrammingLanguage, sdk: OtelSdk) -> Self {
        Self { language, sdk }
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.language, self.sdk)
    }
}

// =============================================================================
// Configuration grouping
// =============================================================================

/// Key grouping instrumentations that share configuration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConfigGroup {
    /// Owning workload.
    pub workload: PodWorkload,
    /// Language of the instrumented processes.
    pub language: ProgrammingLanguage,
}

impl ConfigGroup {
    /// Creates a config group key.
    #[must_use]
    pub const fn new(workload: PodWorkload, language: ProgrammingLanguage) -> Self {
        Self { workload, language }
    }
}

impl fmt::Display for ConfigGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.workload, self.language)
    }
}

/// Processes of one container in one pod.
///
/// Unit of explicit un-instrumentation: removing a group stops every
/// tracked process in it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessGroup {
    /// Owning pod.
    pub pod: PodRef,
    /// Container name within the pod.
    pub container_name: String,
}

impl ProcessGroup {
    /// Creates a process group key.
    #[must_use]
    pub fn new(pod: PodRef, container_name: impl Into<String>) -> Self {
        Self {
            pod,
            container_name: container_name.into(),
        }
    }
}

impl fmt::Display for ProcessGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pod, self.container_name)
    }
}

/// Language-scoped SDK configuration.
///
/// Options are opaque to the manager; instrumentations interpret them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdkConfig {
    /// Language this config targets.
    pub language: Option<ProgrammingLanguage>,
    /// Free-form options (sampling, payload collection, ...).
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl SdkConfig {
    /// Creates an empty config for a language.
    #[must_use]
    pub fn for_language(language: ProgrammingLanguage) -> Self {
        Self {
            language: Some(language),
            options: BTreeMap::new(),
        }
    }

    /// Adds an option.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Settings passed once to a factory when creating an instrumentation.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// Service name reported by the instrumentation.
    pub service_name: String,
    /// OpenTelemetry resource attributes.
    pub resource_attributes: Vec<opentelemetry::KeyValue>,
    /// Initial SDK configuration, if declared.
    pub initial_config: Option<SdkConfig>,
}

impl Settings {
    /// Creates settings with a service name only.
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            resource_attributes: Vec::new(),
            initial_config: None,
        }
    }

    /// Adds a resource attribute.
    #[must_use]
    pub fn with_attribute(mut self, kv: opentelemetry::KeyValue) -> Self {
        self.resource_attributes.push(kv);
        self
    }

    /// Sets the initial config.
    #[must_use]
    pub fn with_initial_config(mut self, config: SdkConfig) -> Self {
        self.initial_config = Some(config);
        self
    }

    /// Looks up a resource attribute value by key.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&opentelemetry::Value> {
        self.resource_attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| &kv.value)
    }
}

// =============================================================================
// Instrumentation state
// =============================================================================

/// Lifecycle state of a single instrumentation.
///
/// ```text
/// Created → Loaded → Running → Closed
///    └────────┴─────────┴──────→ Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstrumentationState {
    /// Constructed by a factory, nothing attached.
    Created,
    /// Probes loaded.
    Loaded,
    /// Run in progress.
    Running,
    /// Closed; terminal.
    Closed,
}

impl InstrumentationState {
    /// Returns true if the state is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Returns true if `ApplyConfig` is meaningful in this state.
    #[must_use]
    pub const fn accepts_config(self) -> bool {
        matches!(self, Self::Running)
    }
}
