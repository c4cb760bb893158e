//! Environment variables injected into instrumented containers.
//!
//! The pod webhook writes these into every container it prepares, so an exec
//! event carrying them can be mapped back to its pod without a cgroup lookup.

/// Name of the pod the process runs in.
pub const POD_NAME: &str = "ODIGOS_POD_NAME";

/// Namespace of the pod the process runs in.
pub const POD_NAMESPACE: &str = "ODIGOS_WORKLOAD_NAMESPACE";

/// Name of the container within the pod.
pub const CONTAINER_NAME: &str = "ODIGOS_CONTAINER_NAME";

/// Standard OpenTelemetry resource attribute list (`k=v,k=v`).
pub const OTEL_RESOURCE_ATTRIBUTES: &str = "OTEL_RESOURCE_ATTRIBUTES";
