// Iron Lotus: Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # instrumentd-core
//!
//! Instrumentation lifecycle primitives for the instrumentd node agent.
//!
//! This crate provides the contracts and the manager that attaches
//! OpenTelemetry instrumentation to processes as they start:
//!
//! - [`Instrumentation`] and [`Factory`] for per-process lifecycle objects
//! - resolver traits mapping a process to its workload and distribution
//! - [`Reporter`] for externalizing health transitions
//! - [`InstrumentationManager`], the single-owner event loop
//! - [`ConfigProvider`] for feeding config updates to a running SDK
//!
//! ## Iron Lotus Framework
//!
//! - **Jidoka**: explicit error handling, no panics; a failed process never
//!   stops the loop
//! - **Heijunka**: one event at a time through a single owner
//! - **Kaizen**: lifecycle counters in [`ManagerMetrics`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use instrumentd_core::{ChannelDetector, InstrumentationManager, LogReporter};
//! use std::sync::Arc;
//!
//! let (manager, updates) = InstrumentationManager::builder()
//!     .with_details_resolver(resolver)
//!     .with_distribution_matcher(matcher)
//!     .with_settings_getter(settings)
//!     .with_reporter(Arc::new(LogReporter))
//!     .with_factory(GO_EBPF, Arc::new(GoFactory))
//!     .build()?;
//!
//! let (feed, detector) = ChannelDetector::channel(1024);
//! manager.run(detector, cancel).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Allow significant_drop_tightening - overly aggressive for async code with locks
#![allow(clippy::significant_drop_tightening)]

pub mod config;
pub mod detector;
pub mod error;
pub mod instrumentation;
pub mod manager;
pub mod metrics;
pub mod provider;
pub mod reporter;
pub mod request;
pub mod resolver;
pub mod resource;
#[cfg(test)]
pub mod tests;
pub mod types;
pub mod update;

pub use config::AgentConfig;
pub use detector::{ChannelDetector, ProcessDetector, ProcessTracker, TrackedPids};
pub use error::{ApplyFailures, InstrumentationError, Result};
pub use instrumentation::{Factory, FactoryRegistry, Instrumentation};
pub use manager::{InstrumentationManager, ManagerBuilder};
pub use metrics::{DistributionCounts, FailureStage, ManagerMetrics, MetricsSnapshot};
pub use provider::{ChannelConfigProvider, ConfigProvider, ConfigStream};
pub use reporter::{LogReporter, Reporter, StatusReason};
pub use request::{InstrumentationRequest, RequestReceiver, RequestSender, request_channel};
pub use resolver::{
    ConfigGroupResolver, DistributionMatcher, ProcessDetailsResolver, SettingsGetter,
    WorkloadLanguageGroups,
};
pub use types::{
    ConfigGroup, Distribution, InstrumentationState, OtelSdk, Pid, PodRef, PodWorkload,
    ProcessDetails, ProcessEvent, ProcessEventKind, ProcessGroup, ProgrammingLanguage, SdkConfig,
    SdkTier, SdkType, Settings, WorkloadKind,
};
pub use update::{ConfigUpdate, ConfigUpdateReceiver, ConfigUpdateSender, config_update_channel};
