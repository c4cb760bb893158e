//! Manager metrics: lifecycle counters for the instrumentation loop.
//!
//! # Toyota Way: Visual Management (目で見る管理)
//! Make instrumentation health on the node visible at a glance.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::types::Distribution;

/// Stage at which an instrumentation attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureStage {
    /// Process details could not be resolved.
    Resolve,
    /// Factory creation failed.
    Init,
    /// Load failed.
    Load,
}

/// Counters shared between the manager loop and its observers.
///
/// Totals are lock-free. Per-distribution counts sit behind one small
/// lock. Cloning is cheap; all clones observe the same counters.
#[derive(Debug, Clone)]
pub struct ManagerMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    // Event rate
    exec_events: AtomicU64,
    exit_events: AtomicU64,

    // Gauge: currently tracked pids
    instrumented: AtomicU64,

    // Outcomes
    expected_misses: AtomicU64,
    resolve_failures: AtomicU64,
    init_failures: AtomicU64,
    load_failures: AtomicU64,
    run_failures: AtomicU64,
    close_failures: AtomicU64,

    // Config
    config_updates_applied: AtomicU64,
    config_apply_errors: AtomicU64,

    // Reporting
    reporter_errors: AtomicU64,

    by_distribution: Mutex<BTreeMap<Distribution, DistributionCounts>>,

    start_time: Instant,
}

impl ManagerMetrics {
    /// Creates a new metrics collector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                exec_events: AtomicU64::new(0),
                exit_events: AtomicU64::new(0),
                instrumented: AtomicU64::new(0),
                expected_misses: AtomicU64::new(0),
                resolve_failures: AtomicU64::new(0),
                init_failures: AtomicU64::new(0),
                load_failures: AtomicU64::new(0),
                run_failures: AtomicU64::new(0),
                close_failures: AtomicU64::new(0),
                config_updates_applied: AtomicU64::new(0),
                config_apply_errors: AtomicU64::new(0),
                reporter_errors: AtomicU64::new(0),
                by_distribution: Mutex::new(BTreeMap::new()),
                start_time: Instant::now(),
            }),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Events
    // ═══════════════════════════════════════════════════════════════════════════

    /// Counts an exec event.
    pub fn record_exec(&self) {
        self.inner.exec_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts an exit event.
    pub fn record_exit(&self) {
        self.inner.exit_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Total exec events seen.
    #[must_use]
    pub fn exec_events(&self) -> u64 {
        self.inner.exec_events.load(Ordering::Relaxed)
    }

    /// Total exit events seen.
    #[must_use]
    pub fn exit_events(&self) -> u64 {
        self.inner.exit_events.load(Ordering::Relaxed)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Tracked instrumentations
    // ═══════════════════════════════════════════════════════════════════════════

    /// Sets the number of currently tracked pids.
    pub fn set_instrumented(&self, count: usize) {
        self.inner
            .instrumented
            .store(count as u64, Ordering::Relaxed);
    }

    /// Number of currently tracked pids.
    #[must_use]
    pub fn instrumented(&self) -> u64 {
        self.inner.instrumented.load(Ordering::Relaxed)
    }

    /// Counts a pid starting to be tracked under `distribution`.
    pub fn record_instrumented(&self, distribution: Distribution) {
        let mut by = self.inner.by_distribution.lock();
        let counts = by
            .entry(distribution)
            .or_insert_with(|| DistributionCounts::new(distribution));
        counts.instrumented += 1;
    }

    /// Counts a pid of `distribution` leaving the tables.
    pub fn record_uninstrumented(&self, distribution: Distribution) {
        if let Some(counts) = self.inner.by_distribution.lock().get_mut(&distribution) {
            counts.instrumented = counts.instrumented.saturating_sub(1);
        }
    }

    /// Counts a create or load failure for `distribution`.
    pub fn record_distribution_failure(&self, distribution: Distribution) {
        let mut by = self.inner.by_distribution.lock();
        let counts = by
            .entry(distribution)
            .or_insert_with(|| DistributionCounts::new(distribution));
        counts.failed += 1;
    }

    /// Counts for one distribution.
    #[must_use]
    pub fn distribution(&self, distribution: Distribution) -> DistributionCounts {
        self.inner
            .by_distribution
            .lock()
            .get(&distribution)
            .copied()
            .unwrap_or_else(|| DistributionCounts::new(distribution))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Outcomes
    // ═══════════════════════════════════════════════════════════════════════════

    /// Counts an expected miss (unsupported language, no factory).
    pub fn record_expected_miss(&self) {
        self.inner.expected_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Expected misses so far.
    #[must_use]
    pub fn expected_misses(&self) -> u64 {
        self.inner.expected_misses.load(Ordering::Relaxed)
    }

    /// Counts a failed instrumentation attempt.
    pub fn record_failure(&self, stage: FailureStage) {
        let counter = match stage {
            FailureStage::Resolve => &self.inner.resolve_failures,
            FailureStage::Init => &self.inner.init_failures,
            FailureStage::Load => &self.inner.load_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Failed attempts at a stage.
    #[must_use]
    pub fn failures(&self, stage: FailureStage) -> u64 {
        match stage {
            FailureStage::Resolve => self.inner.resolve_failures.load(Ordering::Relaxed),
            FailureStage::Init => self.inner.init_failures.load(Ordering::Relaxed),
            FailureStage::Load => self.inner.load_failures.load(Ordering::Relaxed),
        }
    }

    /// Counts a run that ended with a real failure.
    pub fn record_run_failure(&self) {
        self.inner.run_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Run failures so far.
    #[must_use]
    pub fn run_failures(&self) -> u64 {
        self.inner.run_failures.load(Ordering::Relaxed)
    }

    /// Counts a close that failed or timed out.
    pub fn record_close_failure(&self) {
        self.inner.close_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Close failures so far.
    #[must_use]
    pub fn close_failures(&self) -> u64 {
        self.inner.close_failures.load(Ordering::Relaxed)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Config updates
    // ═══════════════════════════════════════════════════════════════════════════

    /// Counts successful `apply_config` calls.
    pub fn record_config_applied(&self, count: u64) {
        self.inner
            .config_updates_applied
            .fetch_add(count, Ordering::Relaxed);
    }

    /// Successful `apply_config` calls so far.
    #[must_use]
    pub fn config_updates_applied(&self) -> u64 {
        self.inner.config_updates_applied.load(Ordering::Relaxed)
    }

    /// Counts failed `apply_config` calls.
    pub fn record_config_apply_errors(&self, count: u64) {
        self.inner
            .config_apply_errors
            .fetch_add(count, Ordering::Relaxed);
    }

    /// Failed `apply_config` calls so far.
    #[must_use]
    pub fn config_apply_errors(&self) -> u64 {
        self.inner.config_apply_errors.load(Ordering::Relaxed)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Reporting
    // ═══════════════════════════════════════════════════════════════════════════

    /// Counts a failed status write.
    pub fn record_reporter_error(&self) {
        self.inner.reporter_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Failed status writes so far.
    #[must_use]
    pub fn reporter_errors(&self) -> u64 {
        self.inner.reporter_errors.load(Ordering::Relaxed)
    }

    /// Time since the manager was built.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.inner.start_time.elapsed()
    }

    /// Takes a serializable point-in-time copy.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            exec_events: self.exec_events(),
            exit_events: self.exit_events(),
            instrumented: self.instrumented(),
            expected_misses: self.expected_misses(),
            resolve_failures: self.failures(FailureStage::Resolve),
            init_failures: self.failures(FailureStage::Init),
            load_failures: self.failures(FailureStage::Load),
            run_failures: self.run_failures(),
            close_failures: self.close_failures(),
            config_updates_applied: self.config_updates_applied(),
            config_apply_errors: self.config_apply_errors(),
            reporter_errors: self.reporter_errors(),
            distributions: self.inner.by_distribution.lock().values().copied().collect(),
            uptime_secs: self.uptime().as_secs(),
        }
    }
}

impl Default for ManagerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-distribution counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionCounts {
    /// Language and SDK.
    pub distribution: Distribution,
    /// Currently tracked pids.
    pub instrumented: u64,
    /// Create and load failures.
    pub failed: u64,
}

impl DistributionCounts {
    const fn new(distribution: Distribution) -> Self {
        Self {
            distribution,
            instrumented: 0,
            failed: 0,
        }
    }
}

/// Point-in-time copy of [`ManagerMetrics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Exec events seen.
    pub exec_events: u64,
    /// Exit events seen.
    pub exit_events: u64,
    /// Currently tracked pids.
    pub instrumented: u64,
    /// Expected misses.
    pub expected_misses: u64,
    /// Resolution failures.
    pub resolve_failures: u64,
    /// Factory failures.
    pub init_failures: u64,
    /// Load failures.
    pub load_failures: u64,
    /// Run failures.
    pub run_failures: u64,
    /// Close failures.
    pub close_failures: u64,
    /// Successful config applications.
    pub config_updates_applied: u64,
    /// Failed config applications.
    pub config_apply_errors: u64,
    /// Failed status writes.
    pub reporter_errors: u64,
    /// Counts per distribution, ordered by distribution.
    #[serde(default)]
    pub distributions: Vec<DistributionCounts>,
    /// Seconds since start.
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let m = ManagerMetrics::new();
        assert_eq!(m.exec_events(), 0);
        assert_eq!(m.instrumented(), 0);
        assert_eq!(m.reporter_errors(), 0);
    }

    #[test]
    fn test_event_counting() {
        let m = ManagerMetrics::new();
        m.record_exec();
        m.record_exec();
        m.record_exit();
        assert_eq!(m.exec_events(), 2);
        assert_eq!(m.exit_events(), 1);
    }

    #[test]
    fn test_failures_by_stage() {
        let m = ManagerMetrics::new();
        m.record_failure(FailureStage::Init);
        m.record_failure(FailureStage::Load);
        m.record_failure(FailureStage::Load);
        assert_eq!(m.failures(FailureStage::Resolve), 0);
        assert_eq!(m.failures(FailureStage::Init), 1);
        assert_eq!(m.failures(FailureStage::Load), 2);
    }

    #[test]
    fn test_metrics_clone_shares_counters() {
        let m1 = ManagerMetrics::new();
        let m2 = m1.clone();
        m1.record_run_failure();
        m2.record_run_failure();
        assert_eq!(m1.run_failures(), 2);
        assert_eq!(m2.run_failures(), 2);
    }

    #[test]
    fn test_gauge_overwrites() {
        let m = ManagerMetrics::default();
        m.set_instrumented(5);
        m.set_instrumented(3);
        assert_eq!(m.instrumented(), 3);
    }

    #[test]
    fn test_snapshot_serialize() {
        let m = ManagerMetrics::new();
        m.record_config_applied(3);
        m.record_config_apply_errors(1);
        m.record_expected_miss();
        m.record_close_failure();
        let snap = m.snapshot();
        assert_eq!(snap.config_updates_applied, 3);
        assert_eq!(snap.config_apply_errors, 1);
        assert_eq!(snap.expected_misses, 1);
        assert_eq!(snap.close_failures, 1);

        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"config_updates_applied\":3"));
        let back: MetricsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn test_counts_by_distribution() {
        use crate::types::{OtelSdk, ProgrammingLanguage};

        let go = Distribution::new(ProgrammingLanguage::Go, OtelSdk::EBPF_COMMUNITY);
        let java = Distribution::new(ProgrammingLanguage::Java, OtelSdk::EBPF_COMMUNITY);
        let m = ManagerMetrics::new();
        m.record_instrumented(go);
        m.record_instrumented(go);
        m.record_uninstrumented(go);
        m.record_distribution_failure(java);
        m.record_uninstrumented(java);

        assert_eq!(m.distribution(go).instrumented, 1);
        assert_eq!(m.distribution(java).instrumented, 0);
        assert_eq!(m.distribution(java).failed, 1);

        let snap = m.snapshot();
        assert_eq!(snap.distributions.len(), 2);
        assert_eq!(snap.distributions[0].distribution, go);
    }
}
