// Iron Lotus: Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # instrumentd-k8s
//!
//! Kubernetes implementations of the instrumentd capabilities.
//!
//! - [`EnvProcessDetailsResolver`]: pod, container and workload from the
//!   injected `ODIGOS_*` environment
//! - [`ContainerDistributionMatcher`]: language and SDK detected per container
//! - [`DeclarativeSettingsGetter`]: service name, resource attributes and
//!   initial SDK config from the workload's instrumentation config
//! - [`InstanceReporter`]: one status record per instrumented process
//!
//! Cluster state is reached through narrow seams ([`PodCatalog`],
//! [`InstrumentationConfigSource`], [`StatusStore`]) with in-memory
//! implementations for tests and single-node demos.
//!
//! ## Example
//!
//! ```rust,ignore
//! let catalog = Arc::new(InMemoryPodCatalog::new());
//! let (manager, updates) = InstrumentationManager::builder()
//!     .with_details_resolver(Arc::new(EnvProcessDetailsResolver::new(catalog.clone())))
//!     .with_distribution_matcher(Arc::new(ContainerDistributionMatcher::new(catalog)))
//!     .with_settings_getter(Arc::new(DeclarativeSettingsGetter::new(configs)))
//!     .with_reporter(Arc::new(InstanceReporter::new(store)))
//!     .with_factory(GO_EBPF, factory)
//!     .build()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

pub mod catalog;
pub mod details;
pub mod distribution;
pub mod env;
pub mod reporter;
pub mod settings;
pub mod status;

pub use catalog::{ContainerInfo, InMemoryPodCatalog, OwnerReference, PodCatalog, PodInfo};
pub use details::EnvProcessDetailsResolver;
pub use distribution::ContainerDistributionMatcher;
pub use reporter::InstanceReporter;
pub use settings::{
    DeclarativeSettingsGetter, InMemoryConfigSource, InstrumentationConfigSource, WorkloadConfig,
    parse_resource_attributes, resource_attributes,
};
pub use status::{
    InMemoryStatusStore, MAX_RECORDS_PER_POD, StatusError, StatusRecord, StatusStore,
    instance_name,
};
