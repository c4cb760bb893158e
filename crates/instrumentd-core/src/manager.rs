//! Instrumentation manager: the single-owner event loop.
//!
//! # Toyota Way: Heijunka (平準化)
//! One loop processes one event at a time from a merged stream of process
//! events, explicit requests, config updates, run results and shutdown.
//! Nothing else mutates the tables.
//!
//! # Toyota Way: Jidoka (自働化)
//! Failures stop at the process they belong to. A failed attempt is
//! reported and dropped; it never takes the loop down.
//!
//! # Tables
//!
//! ```text
//! by_pid:           Pid          → InstrumentationDetails
//! by_config_group:  ConfigGroup  → {Pid}
//! by_process_group: ProcessGroup → {Pid}
//! ```
//!
//! A pid is in `by_config_group[g]` iff `by_pid[pid].config_group == g`,
//! and likewise for process groups. All three are only touched through
//! `track`/`untrack`, and empty group sets are removed.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::detector::{ProcessDetector, ProcessTracker};
use crate::error::{ApplyFailures, InstrumentationError, Result};
use crate::instrumentation::{Factory, FactoryRegistry, Instrumentation};
use crate::metrics::{FailureStage, ManagerMetrics};
use crate::reporter::Reporter;
use crate::request::{InstrumentationRequest, RequestReceiver};
use crate::resolver::{
    ConfigGroupResolver, DistributionMatcher, ProcessDetailsResolver, SettingsGetter,
    WorkloadLanguageGroups,
};
use crate::resource::fallback_settings;
use crate::types::{
    ConfigGroup, Distribution, Pid, ProcessDetails, ProcessEvent, ProcessEventKind, ProcessGroup,
};
use crate::update::{ConfigUpdate, ConfigUpdateReceiver, ConfigUpdateSender, config_update_channel};

// =============================================================================
// Tracking entry
// =============================================================================

/// Everything the manager keeps for one tracked pid.
struct InstrumentationDetails {
    instrumentation: Arc<dyn Instrumentation>,
    details: ProcessDetails,
    distribution: Distribution,
    config_group: ConfigGroup,
    process_group: ProcessGroup,
    run_token: CancellationToken,
    run_id: u64,
}

/// What a run task hands back to the loop.
struct RunExit {
    pid: Pid,
    run_id: u64,
    result: Result<()>,
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`InstrumentationManager`].
///
/// # Poka-Yoke
/// `build` refuses to produce a manager with a missing capability.
#[derive(Default)]
pub struct ManagerBuilder {
    config: AgentConfig,
    details_resolver: Option<Arc<dyn ProcessDetailsResolver>>,
    distribution_matcher: Option<Arc<dyn DistributionMatcher>>,
    config_group_resolver: Option<Arc<dyn ConfigGroupResolver>>,
    settings_getter: Option<Arc<dyn SettingsGetter>>,
    reporter: Option<Arc<dyn Reporter>>,
    factories: FactoryRegistry,
    requests: Option<RequestReceiver>,
    tracker: Option<Arc<dyn ProcessTracker>>,
}

impl ManagerBuilder {
    /// Creates a builder with default agent configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the agent configuration.
    #[must_use]
    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the process details resolver.
    #[must_use]
    pub fn with_details_resolver(mut self, resolver: Arc<dyn ProcessDetailsResolver>) -> Self {
        self.details_resolver = Some(resolver);
        self
    }

    /// Sets the distribution matcher.
    #[must_use]
    pub fn with_distribution_matcher(mut self, matcher: Arc<dyn DistributionMatcher>) -> Self {
        self.distribution_matcher = Some(matcher);
        self
    }

    /// Overrides the config group resolver. Defaults to [`WorkloadLanguageGroups`].
    #[must_use]
    pub fn with_config_group_resolver(mut self, resolver: Arc<dyn ConfigGroupResolver>) -> Self {
        self.config_group_resolver = Some(resolver);
        self
    }

    /// Sets the settings getter.
    #[must_use]
    pub fn with_settings_getter(mut self, getter: Arc<dyn SettingsGetter>) -> Self {
        self.settings_getter = Some(getter);
        self
    }

    /// Sets the reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Replaces the factory registry.
    #[must_use]
    pub fn with_factories(mut self, factories: FactoryRegistry) -> Self {
        self.factories = factories;
        self
    }

    /// Registers one factory.
    #[must_use]
    pub fn with_factory(mut self, distribution: Distribution, factory: Arc<dyn Factory>) -> Self {
        self.factories.register(distribution, factory);
        self
    }

    /// Accepts explicit requests from `requests`.
    ///
    /// Once every sender is dropped the loop stops, like a closed
    /// process-event feed.
    #[must_use]
    pub fn with_requests(mut self, requests: RequestReceiver) -> Self {
        self.requests = Some(requests);
        self
    }

    /// Sets the tracker told about pids instrumented on request.
    ///
    /// [`InstrumentationManager::run`] replaces it with the detector's own
    /// tracker when the detector has one.
    #[must_use]
    pub fn with_tracker(mut self, tracker: Arc<dyn ProcessTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Builds the manager and the sender feeding its config-update channel.
    ///
    /// # Errors
    /// Returns [`InstrumentationError::Config`] if the agent configuration is
    /// invalid, a capability is missing, or no factory is registered.
    pub fn build(self) -> Result<(InstrumentationManager, ConfigUpdateSender)> {
        self.config.validate()?;

        let details_resolver = self
            .details_resolver
            .ok_or_else(|| InstrumentationError::config("manager requires a process details resolver"))?;
        let distribution_matcher = self
            .distribution_matcher
            .ok_or_else(|| InstrumentationError::config("manager requires a distribution matcher"))?;
        let settings_getter = self
            .settings_getter
            .ok_or_else(|| InstrumentationError::config("manager requires a settings getter"))?;
        let reporter = self
            .reporter
            .ok_or_else(|| InstrumentationError::config("manager requires a reporter"))?;
        if self.factories.is_empty() {
            return Err(InstrumentationError::config(
                "manager requires at least one instrumentation factory",
            ));
        }
        let config_group_resolver = self
            .config_group_resolver
            .unwrap_or_else(|| Arc::new(WorkloadLanguageGroups));

        let (tx, rx) = config_update_channel(self.config.config_update_buffer);

        tracing::debug!(
            node = %self.config.node_name,
            factories = self.factories.len(),
            "built instrumentation manager"
        );

        let manager = InstrumentationManager {
            details_resolver,
            distribution_matcher,
            config_group_resolver,
            settings_getter,
            reporter,
            factories: self.factories,
            close_timeout: self.config.close_timeout,
            process_event_buffer: self.config.process_event_buffer,
            by_pid: HashMap::new(),
            by_config_group: HashMap::new(),
            by_process_group: HashMap::new(),
            pending_cleanup: HashMap::new(),
            config_updates: Some(rx),
            requests: self.requests,
            tracker: self.tracker,
            runs_root: CancellationToken::new(),
            run_tasks: JoinSet::new(),
            next_run_id: 0,
            metrics: ManagerMetrics::new(),
        };
        Ok((manager, tx))
    }
}

// =============================================================================
// InstrumentationManager
// =============================================================================

/// Owns the tracking tables and drives every instrumentation's lifecycle.
///
/// The public handlers are what the loop calls per event; they are exposed
/// so embedders and tests can drive the manager without a detector.
pub struct InstrumentationManager {
    details_resolver: Arc<dyn ProcessDetailsResolver>,
    distribution_matcher: Arc<dyn DistributionMatcher>,
    config_group_resolver: Arc<dyn ConfigGroupResolver>,
    settings_getter: Arc<dyn SettingsGetter>,
    reporter: Arc<dyn Reporter>,
    factories: FactoryRegistry,

    close_timeout: Duration,
    process_event_buffer: usize,

    by_pid: HashMap<Pid, InstrumentationDetails>,
    by_config_group: HashMap<ConfigGroup, BTreeSet<Pid>>,
    by_process_group: HashMap<ProcessGroup, BTreeSet<Pid>>,
    /// Pids whose create or load failed; their unhealthy record is deleted on exit.
    pending_cleanup: HashMap<Pid, ProcessDetails>,

    config_updates: Option<ConfigUpdateReceiver>,
    requests: Option<RequestReceiver>,
    tracker: Option<Arc<dyn ProcessTracker>>,
    runs_root: CancellationToken,
    run_tasks: JoinSet<RunExit>,
    next_run_id: u64,
    metrics: ManagerMetrics,
}

impl InstrumentationManager {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> ManagerBuilder {
        ManagerBuilder::new()
    }

    /// Metrics handle. Clones share the same counters.
    #[must_use]
    pub const fn metrics(&self) -> &ManagerMetrics {
        &self.metrics
    }

    /// Tracked pids in ascending order.
    #[must_use]
    pub fn tracked_pids(&self) -> Vec<Pid> {
        let mut pids: Vec<Pid> = self.by_pid.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    /// Returns true if the pid is tracked.
    #[must_use]
    pub fn is_tracked(&self, pid: Pid) -> bool {
        self.by_pid.contains_key(&pid)
    }

    /// Members of a config group in ascending order.
    #[must_use]
    pub fn group_members(&self, group: &ConfigGroup) -> Vec<Pid> {
        self.by_config_group
            .get(group)
            .map(|pids| pids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Tracked members of a process group in ascending order.
    #[must_use]
    pub fn process_group_members(&self, group: &ProcessGroup) -> Vec<Pid> {
        self.by_process_group
            .get(group)
            .map(|pids| pids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of non-empty config groups.
    #[must_use]
    pub fn config_group_count(&self) -> usize {
        self.by_config_group.len()
    }

    /// Pids awaiting status cleanup after a failed attempt.
    #[must_use]
    pub fn pending_cleanup(&self) -> Vec<Pid> {
        let mut pids: Vec<Pid> = self.pending_cleanup.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Event handlers
    // ═══════════════════════════════════════════════════════════════════════════

    /// Handles a process start.
    ///
    /// An exec for a pid that is already tracked is logged and ignored.
    ///
    /// # Errors
    /// Returns the reason the process was not instrumented. Expected misses
    /// ([`InstrumentationError::is_expected_miss`]) are not failures.
    /// Init and load failures have already been reported when returned.
    pub async fn handle_exec(&mut self, event: &ProcessEvent) -> Result<()> {
        self.metrics.record_exec();
        let pid = event.pid;

        if self.by_pid.contains_key(&pid) {
            tracing::warn!(%pid, "exec for already tracked process, ignoring");
            return Ok(());
        }

        let result = self.instrument(event).await;
        if let Err(err) = &result {
            if err.is_expected_miss() {
                self.metrics.record_expected_miss();
            }
        }
        result
    }

    async fn instrument(&mut self, event: &ProcessEvent) -> Result<()> {
        let details = match self.details_resolver.resolve(event).await {
            Ok(details) => details,
            Err(err) => {
                self.metrics.record_failure(FailureStage::Resolve);
                return Err(err);
            }
        };
        self.instrument_details(event.pid, details).await
    }

    async fn instrument_details(&mut self, pid: Pid, details: ProcessDetails) -> Result<()> {
        let distribution = self
            .distribution_matcher
            .match_distribution(&details)
            .await?;
        let factory = self.factories.lookup(&distribution)?;
        let config_group = self
            .config_group_resolver
            .resolve(&details, &distribution);

        let settings = match self.settings_getter.settings(pid, &details, &distribution).await {
            Ok(settings) => settings,
            Err(err) => {
                tracing::warn!(
                    %pid,
                    workload = %details.workload,
                    error = %err,
                    "failed to get instrumentation settings, using fallback"
                );
                fallback_settings(pid, &details)
            }
        };

        let mut instrumentation = match factory.create(pid, settings).await {
            Ok(instrumentation) => {
                self.report_init(pid, &details, None).await;
                instrumentation
            }
            Err(err) => {
                self.metrics.record_failure(FailureStage::Init);
                self.metrics.record_distribution_failure(distribution);
                self.report_init(pid, &details, Some(&err)).await;
                self.pending_cleanup.insert(pid, details);
                return Err(err);
            }
        };

        if let Err(err) = instrumentation.load().await {
            self.metrics.record_failure(FailureStage::Load);
            self.metrics.record_distribution_failure(distribution);
            self.report_load(pid, &details, Some(&err)).await;
            self.pending_cleanup.insert(pid, details);
            return Err(err);
        }

        let instrumentation: Arc<dyn Instrumentation> = Arc::from(instrumentation);
        let run_token = self.runs_root.child_token();
        self.next_run_id += 1;
        let run_id = self.next_run_id;
        self.pending_cleanup.remove(&pid);
        self.track(
            pid,
            InstrumentationDetails {
                instrumentation: Arc::clone(&instrumentation),
                details: details.clone(),
                distribution,
                config_group: config_group.clone(),
                process_group: details.process_group(),
                run_token: run_token.clone(),
                run_id,
            },
        );
        self.report_load(pid, &details, None).await;
        self.spawn_run(pid, run_id, instrumentation, run_token);

        tracing::info!(
            %pid,
            pod = %details.pod,
            container = %details.container_name,
            %distribution,
            group = %config_group,
            "instrumentation loaded"
        );
        Ok(())
    }

    /// Handles a process exit. Untracked pids are a no-op.
    ///
    /// Closes the instrumentation (bounded by the close timeout), deletes
    /// its status record and removes it from the tables. Close and
    /// reporter failures are logged, never returned.
    pub async fn handle_exit(&mut self, pid: Pid) {
        self.metrics.record_exit();

        if !self.remove_tracked(pid).await {
            self.clear_pending(pid).await;
        }
    }

    /// Handles an explicit request.
    ///
    /// `Instrument` skips pids that are already tracked, instruments the
    /// rest from their pre-resolved details and hands the successful pids
    /// to the tracker so their exits are reported. `Uninstrument` closes
    /// every tracked pid of the group and clears the status of its failed
    /// attempts. Per-pid failures are logged, never returned.
    ///
    /// Returns the pids instrumented or removed, in ascending order.
    pub async fn handle_request(&mut self, request: InstrumentationRequest) -> Vec<Pid> {
        match request {
            InstrumentationRequest::Instrument(processes) => {
                let mut instrumented = Vec::new();
                for (pid, details) in processes {
                    // Controllers may repeat a request while reconciling.
                    if self.by_pid.contains_key(&pid) {
                        tracing::debug!(%pid, "already instrumented, skipping request");
                        continue;
                    }
                    tracing::info!(
                        %pid,
                        pod = %details.pod,
                        container = %details.container_name,
                        "explicit instrumentation request"
                    );
                    match self.instrument_details(pid, details).await {
                        Ok(()) => instrumented.push(pid),
                        Err(err) => {
                            if err.is_expected_miss() {
                                self.metrics.record_expected_miss();
                            }
                            log_exec_error(pid, &err);
                        }
                    }
                }
                if let Some(tracker) = &self.tracker {
                    if !instrumented.is_empty() {
                        tracker.track(&instrumented);
                    }
                }
                instrumented
            }
            InstrumentationRequest::Uninstrument(group) => self.uninstrument(&group).await,
        }
    }

    async fn uninstrument(&mut self, group: &ProcessGroup) -> Vec<Pid> {
        let mut removed = self.process_group_members(group);
        for pid in &removed {
            self.remove_tracked(*pid).await;
        }

        let failed: Vec<Pid> = self
            .pending_cleanup
            .iter()
            .filter(|(_, details)| details.process_group() == *group)
            .map(|(pid, _)| *pid)
            .collect();
        for pid in failed {
            self.clear_pending(pid).await;
            removed.push(pid);
        }

        removed.sort_unstable();
        if removed.is_empty() {
            tracing::debug!(%group, "no instrumented processes in group");
        } else {
            tracing::info!(%group, pids = removed.len(), "un-instrumented process group");
        }
        removed
    }

    /// Applies a config update to every tracked member of the addressed groups.
    ///
    /// Delivery is sequential over a snapshot of each group. One failure
    /// never blocks the rest.
    ///
    /// # Errors
    /// Returns [`InstrumentationError::ApplyConfig`] with every failed pid.
    pub async fn handle_config_update(&mut self, update: &ConfigUpdate) -> Result<()> {
        let mut failures = ApplyFailures::new();
        let mut applied = 0u64;

        for config in &update.sdk_configs {
            let Some(language) = config.language else {
                tracing::debug!(workload = %update.workload, "skipping sdk config without language");
                continue;
            };
            let group = ConfigGroup::new(update.workload.clone(), language);

            let snapshot: Vec<(Pid, Arc<dyn Instrumentation>)> = match self.by_config_group.get(&group) {
                Some(pids) => pids
                    .iter()
                    .filter_map(|pid| {
                        self.by_pid
                            .get(pid)
                            .map(|entry| (*pid, Arc::clone(&entry.instrumentation)))
                    })
                    .collect(),
                None => {
                    tracing::debug!(%group, "no tracked instrumentations for config update");
                    continue;
                }
            };

            for (pid, instrumentation) in snapshot {
                match instrumentation.apply_config(config).await {
                    Ok(()) => applied += 1,
                    Err(err) => {
                        tracing::error!(%pid, %group, error = %err, "failed to apply config");
                        failures.push(pid, &err);
                    }
                }
            }
        }

        self.metrics.record_config_applied(applied);
        self.metrics.record_config_apply_errors(failures.len() as u64);
        failures.into_result()
    }

    /// Closes every tracked instrumentation, deletes every status record
    /// and clears the tables.
    ///
    /// Failed attempts get their records deleted too. Run tasks still
    /// alive after the close timeout are aborted.
    pub async fn shutdown(&mut self) {
        let tracked = self.tracked_pids();
        for pid in &tracked {
            self.remove_tracked(*pid).await;
        }
        let pending = self.pending_cleanup();
        for pid in &pending {
            self.clear_pending(*pid).await;
        }
        self.runs_root.cancel();

        let close_timeout = self.close_timeout;
        let run_tasks = &mut self.run_tasks;
        let drained = tokio::time::timeout(close_timeout, async {
            while run_tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                remaining = self.run_tasks.len(),
                "instrumentation runs did not stop in time, aborting"
            );
            self.run_tasks.abort_all();
        }

        tracing::info!(
            closed = tracked.len(),
            cleared = pending.len(),
            "instrumentation manager shut down"
        );
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Event loop
    // ═══════════════════════════════════════════════════════════════════════════

    /// Runs the detector and the event loop until `cancel` fires or either
    /// of them stops.
    ///
    /// The two are joined over a shared token: a failing detector or an
    /// exiting loop cancels the other, and a detector whose feed ended
    /// closes the event channel. The loop always performs its shutdown
    /// before this returns.
    ///
    /// # Errors
    /// Returns the loop's error if it failed, otherwise the detector's.
    pub async fn run<D>(&mut self, mut detector: D, cancel: CancellationToken) -> Result<()>
    where
        D: ProcessDetector,
    {
        let (events_tx, events_rx) = mpsc::channel(self.process_event_buffer);
        let shared = cancel.child_token();
        if let Some(tracker) = detector.tracker() {
            self.tracker = Some(tracker);
        }

        // A detector that ends cleanly drops its sender, so the loop drains
        // what was already queued before stopping. A failing one cancels.
        let detector_task = {
            let shared = shared.clone();
            async move {
                let result = detector.run(events_tx, shared.clone()).await;
                if let Err(err) = &result {
                    tracing::error!(error = %err, "process detector stopped with error");
                    shared.cancel();
                }
                result
            }
        };
        let loop_task = {
            let shared = shared.clone();
            async move {
                let result = self.event_loop(events_rx, shared.clone()).await;
                shared.cancel();
                result
            }
        };

        let (detector_result, loop_result) = tokio::join!(detector_task, loop_task);
        loop_result?;
        detector_result
    }

    async fn event_loop(
        &mut self,
        mut events: mpsc::Receiver<ProcessEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut updates = self
            .config_updates
            .take()
            .ok_or_else(|| InstrumentationError::config("manager event loop already started"))?;
        let mut requests = self.requests.take();

        tracing::info!(factories = self.factories.len(), "instrumentation manager started");

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    tracing::debug!("instrumentation manager cancelled");
                    break;
                }

                event = events.recv() => {
                    let Some(event) = event else {
                        tracing::debug!("process event channel closed");
                        break;
                    };
                    self.dispatch(event).await;
                }

                request = next_request(&mut requests), if requests.is_some() => {
                    let Some(request) = request else {
                        tracing::info!("instrumentation request channel closed");
                        break;
                    };
                    self.handle_request(request).await;
                }

                Some(update) = updates.recv() => {
                    if let Err(err) = self.handle_config_update(&update).await {
                        tracing::error!(workload = %update.workload, error = %err, "config update incomplete");
                    }
                }

                Some(joined) = self.run_tasks.join_next(), if !self.run_tasks.is_empty() => {
                    self.handle_run_joined(joined).await;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn dispatch(&mut self, event: ProcessEvent) {
        match event.kind {
            ProcessEventKind::Exec => {
                if let Err(err) = self.handle_exec(&event).await {
                    log_exec_error(event.pid, &err);
                }
            }
            ProcessEventKind::Exit => self.handle_exit(event.pid).await,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Internals
    // ═══════════════════════════════════════════════════════════════════════════

    fn track(&mut self, pid: Pid, entry: InstrumentationDetails) {
        self.by_config_group
            .entry(entry.config_group.clone())
            .or_default()
            .insert(pid);
        self.by_process_group
            .entry(entry.process_group.clone())
            .or_default()
            .insert(pid);
        self.metrics.record_instrumented(entry.distribution);
        self.by_pid.insert(pid, entry);
        self.metrics.set_instrumented(self.by_pid.len());
    }

    fn untrack(&mut self, pid: Pid) -> Option<InstrumentationDetails> {
        let entry = self.by_pid.remove(&pid)?;
        remove_member(&mut self.by_config_group, &entry.config_group, pid);
        remove_member(&mut self.by_process_group, &entry.process_group, pid);
        self.metrics.record_uninstrumented(entry.distribution);
        self.metrics.set_instrumented(self.by_pid.len());
        Some(entry)
    }

    /// Close, delete status, untrack. Returns false if `pid` was not tracked.
    async fn remove_tracked(&mut self, pid: Pid) -> bool {
        let Some(entry) = self.untrack(pid) else {
            return false;
        };
        self.close_instrumentation(pid, &entry).await;
        self.report_exit(pid, &entry.details).await;
        tracing::info!(%pid, pod = %entry.details.pod, "instrumentation removed");
        true
    }

    async fn clear_pending(&mut self, pid: Pid) {
        if let Some(details) = self.pending_cleanup.remove(&pid) {
            self.report_exit(pid, &details).await;
            tracing::debug!(%pid, "cleared status of failed instrumentation");
        }
    }

    fn spawn_run(
        &mut self,
        pid: Pid,
        run_id: u64,
        instrumentation: Arc<dyn Instrumentation>,
        run_token: CancellationToken,
    ) {
        self.run_tasks.spawn(async move {
            let result = instrumentation.run(run_token).await;
            RunExit { pid, run_id, result }
        });
    }

    /// Waits for the next run task to end and handles its result.
    ///
    /// The loop does this on its own; embedders driving the handlers
    /// directly call it to observe run failures. Returns `None` once no
    /// run task is left.
    pub async fn reap_run(&mut self) -> Option<Pid> {
        while let Some(joined) = self.run_tasks.join_next().await {
            if let Some(pid) = self.handle_run_joined(joined).await {
                return Some(pid);
            }
        }
        None
    }

    /// Reports a run failure, but only for the run that is still tracked
    /// and was not stopped. A stale report must not recreate a status
    /// record deleted by exit.
    async fn handle_run_joined(
        &mut self,
        joined: std::result::Result<RunExit, JoinError>,
    ) -> Option<Pid> {
        let exit = match joined {
            Ok(exit) => exit,
            Err(err) => {
                if err.is_panic() {
                    tracing::error!("instrumentation run task panicked");
                }
                return None;
            }
        };
        let pid = exit.pid;

        match exit.result {
            Ok(()) => tracing::debug!(%pid, "instrumentation run returned"),
            Err(err) if err.is_cancellation() => {
                tracing::debug!(%pid, "instrumentation run stopped");
            }
            Err(err) => {
                let current = self
                    .by_pid
                    .get(&pid)
                    .filter(|entry| entry.run_id == exit.run_id && !entry.run_token.is_cancelled())
                    .map(|entry| entry.details.clone());
                if let Some(details) = current {
                    tracing::error!(%pid, error = %err, "instrumentation run failed");
                    self.metrics.record_run_failure();
                    self.report_run(pid, &details, Some(&err)).await;
                } else {
                    tracing::debug!(%pid, error = %err, "run of removed instrumentation ended");
                }
            }
        }
        Some(pid)
    }

    async fn close_instrumentation(&self, pid: Pid, entry: &InstrumentationDetails) {
        // Cancel first: a run torn down by close must see itself stopped.
        entry.run_token.cancel();
        let closed = tokio::time::timeout(self.close_timeout, entry.instrumentation.close()).await;

        let err = match closed {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err,
            Err(_) => InstrumentationError::CloseTimeout(self.close_timeout),
        };
        self.metrics.record_close_failure();
        tracing::error!(%pid, error = %err, "failed to close instrumentation");
    }

    async fn report_init(&self, pid: Pid, details: &ProcessDetails, err: Option<&InstrumentationError>) {
        let result = self.reporter.on_init(pid, details, err).await;
        self.log_report(pid, "init", result);
    }

    async fn report_load(&self, pid: Pid, details: &ProcessDetails, err: Option<&InstrumentationError>) {
        let result = self.reporter.on_load(pid, details, err).await;
        self.log_report(pid, "load", result);
    }

    async fn report_run(&self, pid: Pid, details: &ProcessDetails, err: Option<&InstrumentationError>) {
        let result = self.reporter.on_run(pid, details, err).await;
        self.log_report(pid, "run", result);
    }

    async fn report_exit(&self, pid: Pid, details: &ProcessDetails) {
        let result = self.reporter.on_exit(pid, details).await;
        self.log_report(pid, "exit", result);
    }

    fn log_report(&self, pid: Pid, hook: &'static str, result: Result<()>) {
        if let Err(err) = result {
            self.metrics.record_reporter_error();
            tracing::error!(%pid, hook, error = %err, "failed to report instrumentation status");
        }
    }
}

impl std::fmt::Debug for InstrumentationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentationManager")
            .field("tracked", &self.by_pid.len())
            .field("groups", &self.by_config_group.len())
            .field("process_groups", &self.by_process_group.len())
            .field("pending_cleanup", &self.pending_cleanup.len())
            .field("close_timeout", &self.close_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
impl InstrumentationManager {
    /// Checks the table invariants in both directions.
    pub(crate) fn tables_consistent(&self) -> bool {
        let forward = self.by_pid.iter().all(|(pid, entry)| {
            self.by_config_group
                .get(&entry.config_group)
                .is_some_and(|pids| pids.contains(pid))
                && self
                    .by_process_group
                    .get(&entry.process_group)
                    .is_some_and(|pids| pids.contains(pid))
        });
        let config_backward = self.by_config_group.iter().all(|(group, pids)| {
            !pids.is_empty()
                && pids.iter().all(|pid| {
                    self.by_pid
                        .get(pid)
                        .is_some_and(|entry| &entry.config_group == group)
                })
        });
        let process_backward = self.by_process_group.iter().all(|(group, pids)| {
            !pids.is_empty()
                && pids.iter().all(|pid| {
                    self.by_pid
                        .get(pid)
                        .is_some_and(|entry| &entry.process_group == group)
                })
        });
        forward && config_backward && process_backward
    }
}

fn remove_member<K>(index: &mut HashMap<K, BTreeSet<Pid>>, key: &K, pid: Pid)
where
    K: std::hash::Hash + Eq,
{
    if let Some(pids) = index.get_mut(key) {
        pids.remove(&pid);
        if pids.is_empty() {
            index.remove(key);
        }
    }
}

async fn next_request(requests: &mut Option<RequestReceiver>) -> Option<InstrumentationRequest> {
    match requests {
        Some(requests) => requests.recv().await,
        None => std::future::pending().await,
    }
}

fn log_exec_error(pid: Pid, err: &InstrumentationError) {
    match err {
        e if e.is_expected_miss() => {
            tracing::debug!(%pid, reason = %e, "process not instrumented");
        }
        InstrumentationError::MissingEnv(_)
        | InstrumentationError::Resolve(_)
        | InstrumentationError::ContainerNotInPod(_) => {
            tracing::warn!(%pid, error = %err, "failed to resolve process");
        }
        _ => tracing::error!(%pid, error = %err, "failed to instrument process"),
    }
}
