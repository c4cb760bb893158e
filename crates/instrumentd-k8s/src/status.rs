//! Instrumentation instance status records.
//!
//! One record per instrumented process, named `<pod>-<pid>` and labelled with
//! its owner pod. Records use optimistic concurrency: every write bumps
//! `resource_version`, and an update carrying a stale version conflicts.

use std::collections::HashMap;
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use instrumentd_core::{InstrumentationError, Pid, ProcessDetails, StatusReason};

/// Upper bound on records per owner pod.
pub const MAX_RECORDS_PER_POD: usize = 16;

/// Record name for a process: `<owner>-<pid>`.
#[must_use]
pub fn instance_name(owner_pod: &str, pid: Pid) -> String {
    format!("{owner_pod}-{pid}")
}

/// Status store errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatusError {
    /// No record with this name.
    #[error("status record {0} not found")]
    NotFound(String),

    /// A record with this name already exists.
    #[error("status record {0} already exists")]
    AlreadyExists(String),

    /// The record changed since it was read.
    #[error("status record {0} was modified concurrently")]
    Conflict(String),

    /// The owner pod already has the maximum number of records.
    #[error("status records for pod {owner} are over the limit of {limit}")]
    LimitExceeded {
        /// Owner pod name.
        owner: String,
        /// Configured limit.
        limit: usize,
    },

    /// The backing store failed.
    #[error("status store unavailable: {0}")]
    Unavailable(String),
}

impl From<StatusError> for InstrumentationError {
    fn from(err: StatusError) -> Self {
        Self::status(err.to_string())
    }
}

/// Health of one instrumented process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// `<owner_pod>-<pid>`.
    pub name: String,
    /// Namespace of the owner pod.
    pub namespace: String,
    /// Pod the process runs in.
    pub owner_pod: String,
    /// Container the process runs in.
    pub container_name: String,
    /// Runtime object name of the workload, e.g. `deployment-cart`.
    pub app_name: String,
    /// Unset until the first load result.
    pub healthy: Option<bool>,
    /// Reason for the last transition.
    pub reason: Option<StatusReason>,
    /// Human-readable detail, usually the error text.
    pub message: String,
    /// Time of the last status write.
    pub last_update_time: Option<SystemTime>,
    /// Assigned by the store on create.
    pub uid: Uuid,
    /// Assigned by the store on every write.
    pub resource_version: u64,
}

impl StatusRecord {
    /// Creates an empty record for `pid` in `details`'s pod.
    #[must_use]
    pub fn for_process(pid: Pid, details: &ProcessDetails) -> Self {
        Self {
            name: instance_name(&details.pod.name, pid),
            namespace: details.pod.namespace.clone(),
            owner_pod: details.pod.name.clone(),
            container_name: details.container_name.clone(),
            app_name: details.workload.runtime_object_name(),
            healthy: None,
            reason: None,
            message: String::new(),
            last_update_time: None,
            uid: Uuid::nil(),
            resource_version: 0,
        }
    }

    /// Sets the health fields and stamps the update time.
    pub fn set_status(&mut self, healthy: Option<bool>, reason: StatusReason, message: String) {
        self.healthy = healthy;
        self.reason = Some(reason);
        self.message = message;
        self.last_update_time = Some(SystemTime::now());
    }
}

/// Storage for status records.
#[async_trait]
pub trait StatusStore: Send + Sync + 'static {
    /// Fetches a record.
    async fn get(&self, namespace: &str, name: &str) -> Result<StatusRecord, StatusError>;

    /// Creates a record. Returns the stored copy with uid and version set.
    async fn create(&self, record: &StatusRecord) -> Result<StatusRecord, StatusError>;

    /// Replaces a record if `record.resource_version` is current.
    async fn update(&self, record: &StatusRecord) -> Result<StatusRecord, StatusError>;

    /// Deletes a record.
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StatusError>;

    /// All records owned by a pod.
    async fn list_by_owner(
        &self,
        namespace: &str,
        owner_pod: &str,
    ) -> Result<Vec<StatusRecord>, StatusError>;
}

#[derive(Debug, Default)]
struct StoreState {
    records: HashMap<(String, String), StatusRecord>,
    next_version: u64,
}

impl StoreState {
    fn bump(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }
}

/// Status store held in memory.
#[derive(Debug)]
pub struct InMemoryStatusStore {
    state: Mutex<StoreState>,
    limit: usize,
}

impl Default for InMemoryStatusStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStatusStore {
    /// Creates a store with the default per-pod limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(MAX_RECORDS_PER_POD)
    }

    /// Creates a store with a custom per-pod limit.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            limit,
        }
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Returns true if no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().records.is_empty()
    }
}

fn key(namespace: &str, name: &str) -> (String, String) {
    (namespace.to_string(), name.to_string())
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<StatusRecord, StatusError> {
        self.state
            .lock()
            .records
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| StatusError::NotFound(name.to_string()))
    }

    async fn create(&self, record: &StatusRecord) -> Result<StatusRecord, StatusError> {
        let mut state = self.state.lock();
        let k = key(&record.namespace, &record.name);
        if state.records.contains_key(&k) {
            return Err(StatusError::AlreadyExists(record.name.clone()));
        }
        let owned = state
            .records
            .values()
            .filter(|r| r.namespace == record.namespace && r.owner_pod == record.owner_pod)
            .count();
        if owned >= self.limit {
            return Err(StatusError::LimitExceeded {
                owner: record.owner_pod.clone(),
                limit: self.limit,
            });
        }

        let mut stored = record.clone();
        stored.uid = Uuid::new_v4();
        stored.resource_version = state.bump();
        state.records.insert(k, stored.clone());
        Ok(stored)
    }

    async fn update(&self, record: &StatusRecord) -> Result<StatusRecord, StatusError> {
        let mut state = self.state.lock();
        let version = state.next_version + 1;
        let current = state
            .records
            .get_mut(&key(&record.namespace, &record.name))
            .ok_or_else(|| StatusError::NotFound(record.name.clone()))?;
        if current.resource_version != record.resource_version {
            return Err(StatusError::Conflict(record.name.clone()));
        }

        let uid = current.uid;
        *current = record.clone();
        current.uid = uid;
        current.resource_version = version;
        let stored = current.clone();
        state.next_version = version;
        Ok(stored)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StatusError> {
        self.state
            .lock()
            .records
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| StatusError::NotFound(name.to_string()))
    }

    async fn list_by_owner(
        &self,
        namespace: &str,
        owner_pod: &str,
    ) -> Result<Vec<StatusRecord>, StatusError> {
        let mut records: Vec<StatusRecord> = self
            .state
            .lock()
            .records
            .values()
            .filter(|r| r.namespace == namespace && r.owner_pod == owner_pod)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }
}
