//! Explicit instrumentation requests.
//!
//! Controllers that already know which processes to instrument (or which
//! group to stop) send requests here instead of waiting for process
//! events. Bounded, multi-producer, single-consumer like the config-update
//! channel.

use std::collections::BTreeMap;

use tokio::sync::mpsc;

use crate::error::{InstrumentationError, Result};
use crate::types::{Pid, ProcessDetails, ProcessGroup};

/// An explicit request to the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstrumentationRequest {
    /// Instrument pre-resolved processes. Pids already tracked are skipped.
    Instrument(BTreeMap<Pid, ProcessDetails>),
    /// Stop every tracked process in a group.
    Uninstrument(ProcessGroup),
}

impl InstrumentationRequest {
    /// Request to instrument a single process.
    #[must_use]
    pub fn instrument(pid: Pid, details: ProcessDetails) -> Self {
        Self::Instrument(BTreeMap::from([(pid, details)]))
    }

    /// Request to un-instrument a group.
    #[must_use]
    pub const fn uninstrument(group: ProcessGroup) -> Self {
        Self::Uninstrument(group)
    }
}

/// Creates a bounded request channel.
#[must_use]
pub fn request_channel(capacity: usize) -> (RequestSender, RequestReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (RequestSender { tx }, RequestReceiver { rx })
}

/// Producer half of the request channel.
#[derive(Debug, Clone)]
pub struct RequestSender {
    tx: mpsc::Sender<InstrumentationRequest>,
}

impl RequestSender {
    /// Sends a request, waiting while the channel is full.
    ///
    /// # Errors
    /// Returns [`InstrumentationError::ChannelClosed`] if the manager is gone.
    pub async fn send(&self, request: InstrumentationRequest) -> Result<()> {
        self.tx
            .send(request)
            .await
            .map_err(|_| InstrumentationError::ChannelClosed("instrumentation requests".into()))
    }
}

/// Consumer half, owned by the manager loop.
#[derive(Debug)]
pub struct RequestReceiver {
    rx: mpsc::Receiver<InstrumentationRequest>,
}

impl RequestReceiver {
    /// Receives the next request. `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<InstrumentationRequest> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PodRef, PodWorkload, WorkloadKind};

    #[tokio::test]
    async fn test_requests_in_order() {
        let (tx, mut rx) = request_channel(2);
        let pod = PodRef::new("ns", "a");
        let details = ProcessDetails::new(
            pod.clone(),
            "app",
            PodWorkload::new("ns", WorkloadKind::Pod, "a"),
        );
        tx.send(InstrumentationRequest::instrument(Pid::new(1), details))
            .await
            .unwrap();
        tx.send(InstrumentationRequest::uninstrument(ProcessGroup::new(pod, "app")))
            .await
            .unwrap();

        assert!(matches!(rx.recv().await, Some(InstrumentationRequest::Instrument(m)) if m.len() == 1));
        assert!(matches!(rx.recv().await, Some(InstrumentationRequest::Uninstrument(_))));
        drop(tx);
        assert!(rx.recv().await.is_none());
    }
}
