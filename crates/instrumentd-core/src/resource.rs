//! Resource attributes derived from a process's identity.

use opentelemetry::KeyValue;
use opentelemetry_semantic_conventions::attribute;

use crate::types::{Pid, PodWorkload, ProcessDetails, Settings, WorkloadKind};

/// Kubernetes and process attributes for an instrumented process.
///
/// Includes namespace, pod, container, the workload attribute matching its
/// kind, and `process.*` attributes when the event carried them.
#[must_use]
pub fn identity_attributes(pid: Pid, details: &ProcessDetails) -> Vec<KeyValue> {
    let mut attrs = vec![
        KeyValue::new(attribute::K8S_NAMESPACE_NAME, details.pod.namespace.clone()),
        KeyValue::new(attribute::K8S_POD_NAME, details.pod.name.clone()),
        KeyValue::new(attribute::K8S_CONTAINER_NAME, details.container_name.clone()),
    ];
    attrs.extend(workload_attribute(&details.workload));
    attrs.push(KeyValue::new(attribute::PROCESS_PID, i64::from(pid.as_u32())));

    if let Some(command) = details.cmdline.split_whitespace().next() {
        attrs.push(KeyValue::new(attribute::PROCESS_COMMAND, command.to_string()));
    }
    if let Some(exe) = &details.exe_path {
        attrs.push(KeyValue::new(attribute::PROCESS_EXECUTABLE_PATH, exe.clone()));
    }
    attrs
}

/// The `k8s.<kind>.name` attribute for a workload. Bare pods have none;
/// `k8s.pod.name` already covers them.
#[must_use]
pub fn workload_attribute(workload: &PodWorkload) -> Option<KeyValue> {
    let key = match workload.kind {
        WorkloadKind::Deployment => attribute::K8S_DEPLOYMENT_NAME,
        WorkloadKind::StatefulSet => attribute::K8S_STATEFULSET_NAME,
        WorkloadKind::DaemonSet => attribute::K8S_DAEMONSET_NAME,
        WorkloadKind::Job => attribute::K8S_JOB_NAME,
        WorkloadKind::CronJob => attribute::K8S_CRONJOB_NAME,
        WorkloadKind::Pod => return None,
    };
    Some(KeyValue::new(key, workload.name.clone()))
}

/// Settings used when the declarative config cannot be read: the workload
/// name as service name, identity attributes, no initial config.
#[must_use]
pub fn fallback_settings(pid: Pid, details: &ProcessDetails) -> Settings {
    Settings {
        service_name: details.workload.name.clone(),
        resource_attributes: identity_attributes(pid, details),
        initial_config: None,
    }
}
