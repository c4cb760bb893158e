//! instrumentd: OpenTelemetry instrumentation lifecycle manager for
//! Kubernetes nodes.
//!
//! Attaches instrumentation to processes as they start, keeps it
//! configured while they run, and tears it down when they exit.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use instrumentd::prelude::*;
//!
//! instrumentd::logging::init_logging("info")?;
//! let (mut manager, updates) = InstrumentationManager::builder()
//!     .with_details_resolver(resolver)
//!     .with_distribution_matcher(matcher)
//!     .with_settings_getter(settings)
//!     .with_reporter(reporter)
//!     .with_factory(go_ebpf, factory)
//!     .build()?;
//! manager.run(detector, CancellationToken::new()).await?;
//! ```

pub mod logging;

pub use instrumentd_core as core;
pub use instrumentd_k8s as k8s;

/// Prelude module for common imports.
pub mod prelude {
    pub use instrumentd_core::{
        AgentConfig, ChannelConfigProvider, ChannelDetector, ConfigProvider, ConfigUpdate,
        ConfigUpdateSender, Distribution, Factory, Instrumentation, InstrumentationError,
        InstrumentationManager, OtelSdk, Pid, ProcessDetector, ProcessEvent, ProgrammingLanguage,
        Reporter, SdkConfig, Settings,
    };
    pub use instrumentd_k8s::{
        ContainerDistributionMatcher, DeclarativeSettingsGetter, EnvProcessDetailsResolver,
        InstanceReporter,
    };
    pub use tokio_util::sync::CancellationToken;
}
