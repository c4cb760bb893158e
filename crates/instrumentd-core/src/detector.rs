//! Process-event source seam.
//!
//! The kernel-level detector lives outside this crate. The manager only
//! needs something that pushes [`ProcessEvent`]s into a channel until it
//! is cancelled, plus a [`ProcessTracker`] for processes it learns about
//! through explicit requests.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{InstrumentationError, Result};
use crate::types::{Pid, ProcessEvent, ProcessEventKind};

/// Asks a detector to follow processes it did not report itself.
///
/// Pids instrumented through an explicit request are handed over so the
/// detector emits their exit events.
pub trait ProcessTracker: Send + Sync + 'static {
    /// Starts following `pids`.
    fn track(&self, pids: &[Pid]);
}

/// Emits process start/stop events.
#[async_trait]
pub trait ProcessDetector: Send + 'static {
    /// Pushes events into `events` until `cancel` fires or the source ends.
    ///
    /// Returning (with or without error) stops the manager loop.
    ///
    /// # Errors
    /// Returns an error if the underlying source fails.
    async fn run(
        &mut self,
        events: mpsc::Sender<ProcessEvent>,
        cancel: CancellationToken,
    ) -> Result<()>;

    /// Handle the manager keeps for the lifetime of the loop.
    ///
    /// Detectors that report every process they care about return `None`.
    fn tracker(&self) -> Option<Arc<dyn ProcessTracker>> {
        None
    }
}

/// Pids followed on request, shared between a [`ChannelDetector`] and
/// the manager.
#[derive(Debug, Default)]
pub struct TrackedPids {
    pids: Mutex<BTreeSet<Pid>>,
}

impl TrackedPids {
    /// Followed pids in ascending order.
    #[must_use]
    pub fn pids(&self) -> Vec<Pid> {
        self.pids.lock().iter().copied().collect()
    }

    /// Returns true if `pid` is followed.
    #[must_use]
    pub fn contains(&self, pid: Pid) -> bool {
        self.pids.lock().contains(&pid)
    }

    fn forget(&self, pid: Pid) {
        self.pids.lock().remove(&pid);
    }
}

impl ProcessTracker for TrackedPids {
    fn track(&self, pids: &[Pid]) {
        self.pids.lock().extend(pids.iter().copied());
    }
}

/// Detector that forwards events from an upstream channel.
///
/// Adapts any feed (eBPF ring buffer reader, test driver) to the manager.
#[derive(Debug)]
pub struct ChannelDetector {
    upstream: mpsc::Receiver<ProcessEvent>,
    tracked: Arc<TrackedPids>,
}

impl ChannelDetector {
    /// Wraps an upstream receiver.
    #[must_use]
    pub fn new(upstream: mpsc::Receiver<ProcessEvent>) -> Self {
        Self {
            upstream,
            tracked: Arc::new(TrackedPids::default()),
        }
    }

    /// Pids handed over by the manager and not yet seen exiting.
    #[must_use]
    pub fn tracked(&self) -> Arc<TrackedPids> {
        Arc::clone(&self.tracked)
    }

    /// Creates a detector and the sender that feeds it.
    #[must_use]
    pub fn channel(capacity: usize) -> (mpsc::Sender<ProcessEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl ProcessDetector for ChannelDetector {
    async fn run(
        &mut self,
        events: mpsc::Sender<ProcessEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                event = self.upstream.recv() => {
                    let Some(event) = event else {
                        tracing::info!("process event feed ended");
                        return Ok(());
                    };
                    if event.kind == ProcessEventKind::Exit {
                        self.tracked.forget(event.pid);
                    }
                    // Stay responsive to cancel while the manager's buffer is full.
                    tokio::select! {
                        () = cancel.cancelled() => return Ok(()),
                        sent = events.send(event) => {
                            if sent.is_err() {
                                return Err(InstrumentationError::ChannelClosed(
                                    "process events".into(),
                                ));
                            }
                        }
                    }
                }
            }
        }
    }

    fn tracker(&self) -> Option<Arc<dyn ProcessTracker>> {
        let tracker: Arc<dyn ProcessTracker> = self.tracked();
        Some(tracker)
    }
}
