//! Reporter writing instrumentation instance status records.

use std::sync::Arc;

use async_trait::async_trait;

use instrumentd_core::{
    InstrumentationError, Pid, ProcessDetails, Reporter, Result, StatusReason,
};

use crate::status::{StatusError, StatusRecord, StatusStore, instance_name};

/// Default number of re-fetch attempts after an update conflict.
pub const DEFAULT_CONFLICT_RETRIES: usize = 5;

/// Writes one status record per instrumented process.
///
/// Writes are create-or-update: a missing record is created with the new
/// status, an existing one is updated in place. Update conflicts re-fetch
/// the record and retry a bounded number of times.
pub struct InstanceReporter {
    store: Arc<dyn StatusStore>,
    conflict_retries: usize,
}

impl InstanceReporter {
    /// Creates a reporter over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self {
            store,
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }

    /// Sets the number of conflict retries.
    #[must_use]
    pub fn with_conflict_retries(mut self, retries: usize) -> Self {
        self.conflict_retries = retries;
        self
    }

    async fn write(
        &self,
        pid: Pid,
        details: &ProcessDetails,
        healthy: Option<bool>,
        reason: StatusReason,
        message: String,
    ) -> std::result::Result<(), StatusError> {
        let namespace = &details.pod.namespace;
        let name = instance_name(&details.pod.name, pid);

        let mut record = match self.store.get(namespace, &name).await {
            Ok(record) => record,
            Err(StatusError::NotFound(_)) => {
                let mut record = StatusRecord::for_process(pid, details);
                record.set_status(healthy, reason, message.clone());
                match self.store.create(&record).await {
                    Ok(_) => return Ok(()),
                    Err(StatusError::AlreadyExists(_)) => self.store.get(namespace, &name).await?,
                    Err(err) => return Err(err),
                }
            }
            Err(err) => return Err(err),
        };

        let mut attempt = 0;
        loop {
            record.set_status(healthy, reason, message.clone());
            match self.store.update(&record).await {
                Ok(_) => return Ok(()),
                Err(StatusError::Conflict(_)) if attempt < self.conflict_retries => {
                    attempt += 1;
                    tracing::debug!(%pid, record = %name, attempt, "status update conflict, retrying");
                    record = self.store.get(namespace, &name).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl Reporter for InstanceReporter {
    async fn on_init(
        &self,
        pid: Pid,
        details: &ProcessDetails,
        err: Option<&InstrumentationError>,
    ) -> Result<()> {
        let Some(err) = err else {
            return Ok(());
        };
        self.write(
            pid,
            details,
            Some(false),
            StatusReason::FailedToInitialize,
            err.to_string(),
        )
        .await?;
        Ok(())
    }

    async fn on_load(
        &self,
        pid: Pid,
        details: &ProcessDetails,
        err: Option<&InstrumentationError>,
    ) -> Result<()> {
        let (healthy, reason, message) = match err {
            Some(err) => (false, StatusReason::FailedToLoad, err.to_string()),
            None => (
                true,
                StatusReason::LoadedSuccessfully,
                format!(
                    "Successfully loaded eBPF probes to pod: {} container: {}",
                    details.pod.name, details.container_name
                ),
            ),
        };
        self.write(pid, details, Some(healthy), reason, message).await?;
        Ok(())
    }

    async fn on_run(
        &self,
        pid: Pid,
        details: &ProcessDetails,
        err: Option<&InstrumentationError>,
    ) -> Result<()> {
        let Some(err) = err else {
            return Ok(());
        };
        self.write(pid, details, Some(false), StatusReason::FailedToRun, err.to_string())
            .await?;
        Ok(())
    }

    async fn on_exit(&self, pid: Pid, details: &ProcessDetails) -> Result<()> {
        let name = instance_name(&details.pod.name, pid);
        match self.store.delete(&details.pod.namespace, &name).await {
            Ok(()) | Err(StatusError::NotFound(_)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::status::InMemoryStatusStore;
    use instrumentd_core::{PodRef, PodWorkload, WorkloadKind};

    fn details() -> ProcessDetails {
        ProcessDetails::new(
            PodRef::new("shop", "a"),
            "server",
            PodWorkload::new("shop", WorkloadKind::Deployment, "cart"),
        )
    }

    /// Store that conflicts on the first `n` updates.
    struct ConflictingStore {
        inner: InMemoryStatusStore,
        conflicts: AtomicUsize,
    }

    impl ConflictingStore {
        fn new(conflicts: usize) -> Self {
            Self {
                inner: InMemoryStatusStore::new(),
                conflicts: AtomicUsize::new(conflicts),
            }
        }
    }

    #[async_trait]
    impl StatusStore for ConflictingStore {
        async fn get(&self, namespace: &str, name: &str) -> std::result::Result<StatusRecord, StatusError> {
            self.inner.get(namespace, name).await
        }

        async fn create(&self, record: &StatusRecord) -> std::result::Result<StatusRecord, StatusError> {
            self.inner.create(record).await
        }

        async fn update(&self, record: &StatusRecord) -> std::result::Result<StatusRecord, StatusError> {
            let left = self.conflicts.load(Ordering::SeqCst);
            if left > 0 {
                self.conflicts.store(left - 1, Ordering::SeqCst);
                return Err(StatusError::Conflict(record.name.clone()));
            }
            self.inner.update(record).await
        }

        async fn delete(&self, namespace: &str, name: &str) -> std::result::Result<(), StatusError> {
            self.inner.delete(namespace, name).await
        }

        async fn list_by_owner(
            &self,
            namespace: &str,
            owner_pod: &str,
        ) -> std::result::Result<Vec<StatusRecord>, StatusError> {
            self.inner.list_by_owner(namespace, owner_pod).await
        }
    }

    #[tokio::test]
    async fn test_successful_load_creates_healthy_record() {
        let store = Arc::new(InMemoryStatusStore::new());
        let reporter = InstanceReporter::new(store.clone());
        reporter.on_load(Pid::new(42), &details(), None).await.unwrap();

        let record = store.get("shop", "a-42").await.unwrap();
        assert_eq!(record.healthy, Some(true));
        assert_eq!(record.reason, Some(StatusReason::LoadedSuccessfully));
        assert_eq!(record.message, "Successfully loaded eBPF probes to pod: a container: server");
        assert_eq!(record.app_name, "deployment-cart");
        assert!(record.last_update_time.is_some());
    }

    #[tokio::test]
    async fn test_run_failure_updates_existing_record() {
        let store = Arc::new(InMemoryStatusStore::new());
        let reporter = InstanceReporter::new(store.clone());
        let pid = Pid::new(7);
        reporter.on_load(pid, &details(), None).await.unwrap();
        let uid = store.get("shop", "a-7").await.unwrap().uid;

        let err = InstrumentationError::run("perf buffer closed");
        reporter.on_run(pid, &details(), Some(&err)).await.unwrap();

        let record = store.get("shop", "a-7").await.unwrap();
        assert_eq!(record.uid, uid);
        assert_eq!(record.healthy, Some(false));
        assert_eq!(record.reason, Some(StatusReason::FailedToRun));
        assert!(record.message.contains("perf buffer closed"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_successful_init_writes_nothing() {
        let store = Arc::new(InMemoryStatusStore::new());
        let reporter = InstanceReporter::new(store.clone());
        reporter.on_init(Pid::new(1), &details(), None).await.unwrap();
        reporter.on_run(Pid::new(1), &details(), None).await.unwrap();
        assert!(store.is_empty());

        let err = InstrumentationError::init("unsupported go version");
        reporter.on_init(Pid::new(1), &details(), Some(&err)).await.unwrap();
        let record = store.get("shop", "a-1").await.unwrap();
        assert_eq!(record.reason, Some(StatusReason::FailedToInitialize));
    }

    #[tokio::test]
    async fn test_exit_is_idempotent() {
        let store = Arc::new(InMemoryStatusStore::new());
        let reporter = InstanceReporter::new(store.clone());
        reporter.on_load(Pid::new(3), &details(), None).await.unwrap();

        reporter.on_exit(Pid::new(3), &details()).await.unwrap();
        assert!(store.is_empty());
        reporter.on_exit(Pid::new(3), &details()).await.unwrap();
    }

    #[tokio::test]
    async fn test_conflicts_are_retried() {
        let store = Arc::new(ConflictingStore::new(2));
        let reporter = InstanceReporter::new(store.clone());
        let pid = Pid::new(5);
        reporter.on_load(pid, &details(), None).await.unwrap();

        let err = InstrumentationError::load("verifier rejected program");
        reporter.on_load(pid, &details(), Some(&err)).await.unwrap();
        let record = store.get("shop", "a-5").await.unwrap();
        assert_eq!(record.reason, Some(StatusReason::FailedToLoad));
    }

    #[tokio::test]
    async fn test_conflict_retries_are_bounded() {
        let store = Arc::new(ConflictingStore::new(10));
        let reporter = InstanceReporter::new(store.clone()).with_conflict_retries(1);
        let pid = Pid::new(5);
        reporter.on_load(pid, &details(), None).await.unwrap();

        let err = InstrumentationError::load("verifier rejected program");
        let result = reporter.on_load(pid, &details(), Some(&err)).await;
        assert!(matches!(result, Err(InstrumentationError::Status(_))));
    }
}
