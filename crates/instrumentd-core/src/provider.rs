//! Config provider handed to instrumentations.
//!
//! An instrumentation receives configuration through `apply_config`; the
//! provider turns those calls into a stream its SDK side can watch.
//!
//! # Shutdown
//!
//! The sending side moves through three states under one lock:
//!
//! ```text
//! Open(sender) ──shutdown──→ Closing ──→ Closed
//! ```
//!
//! Only the first `shutdown` takes the sender, so the stream is closed
//! exactly once. Sends after shutdown has begun are silent no-ops.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{InstrumentationError, Result};

/// Stream of configuration values.
pub type ConfigStream<C> = Pin<Box<dyn Stream<Item = C> + Send>>;

/// Source of configuration for one instrumentation.
#[async_trait]
pub trait ConfigProvider<C>: Send + Sync {
    /// Returns the configuration to start with.
    ///
    /// # Errors
    /// Returns an error if the initial configuration is unavailable.
    async fn initial_config(&self) -> Result<C>;

    /// Returns the stream of subsequent configurations.
    ///
    /// # Errors
    /// Returns [`InstrumentationError::Config`] if the stream was already taken.
    fn watch(&self) -> Result<ConfigStream<C>>;

    /// Closes the stream. Safe to call more than once.
    ///
    /// # Errors
    /// Returns an error if the provider could not shut down cleanly.
    async fn shutdown(&self) -> Result<()>;
}

enum SenderState<C> {
    Open(mpsc::Sender<C>),
    Closing,
    Closed,
}

/// Channel-backed [`ConfigProvider`].
pub struct ChannelConfigProvider<C> {
    initial: C,
    state: Mutex<SenderState<C>>,
    receiver: Mutex<Option<mpsc::Receiver<C>>>,
}

impl<C> ChannelConfigProvider<C>
where
    C: Clone + Send + Sync + 'static,
{
    /// Creates a provider with an initial config and stream capacity.
    #[must_use]
    pub fn new(initial: C, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            initial,
            state: Mutex::new(SenderState::Open(tx)),
            receiver: Mutex::new(Some(rx)),
        }
    }

    /// Sends a config, blocking until it is delivered or `deadline` passes.
    ///
    /// Returns `Ok(())` without sending once shutdown has begun.
    ///
    /// # Errors
    /// Returns [`InstrumentationError::Timeout`] if the deadline elapses,
    /// or `ChannelClosed` if the watcher dropped the stream.
    pub async fn send_config(&self, config: C, deadline: Instant) -> Result<()> {
        let tx = match &*self.state.lock() {
            SenderState::Open(tx) => tx.clone(),
            SenderState::Closing | SenderState::Closed => return Ok(()),
        };

        let started = Instant::now();
        match tokio::time::timeout_at(deadline, tx.send(config)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(InstrumentationError::ChannelClosed("config watcher".into())),
            Err(_) => Err(InstrumentationError::Timeout(
                deadline.saturating_duration_since(started),
            )),
        }
    }

    /// Sends a config with a relative timeout.
    ///
    /// # Errors
    /// See [`Self::send_config`].
    pub async fn send_config_timeout(&self, config: C, timeout: Duration) -> Result<()> {
        self.send_config(config, Instant::now() + timeout).await
    }

    /// Returns true once shutdown has completed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(*self.state.lock(), SenderState::Closed)
    }
}

#[async_trait]
impl<C> ConfigProvider<C> for ChannelConfigProvider<C>
where
    C: Clone + Send + Sync + 'static,
{
    async fn initial_config(&self) -> Result<C> {
        Ok(self.initial.clone())
    }

    fn watch(&self) -> Result<ConfigStream<C>> {
        self.receiver
            .lock()
            .take()
            .map(|rx| Box::pin(ReceiverStream::new(rx)) as ConfigStream<C>)
            .ok_or_else(|| InstrumentationError::config("config stream already watched"))
    }

    async fn shutdown(&self) -> Result<()> {
        let tx = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, SenderState::Closing) {
                SenderState::Open(tx) => tx,
                prev @ (SenderState::Closing | SenderState::Closed) => {
                    *state = prev;
                    return Ok(());
                }
            }
        };

        // Sends already past the state check hold their own clone and end by
        // their deadline; the stream terminates when the last one drops.
        drop(tx);
        *self.state.lock() = SenderState::Closed;
        tracing::debug!("config provider shut down");
        Ok(())
    }
}

impl<C> std::fmt::Debug for ChannelConfigProvider<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match *self.state.lock() {
            SenderState::Open(_) => "open",
            SenderState::Closing => "closing",
            SenderState::Closed => "closed",
        };
        f.debug_struct("ChannelConfigProvider")
            .field("state", &state)
            .finish_non_exhaustive()
    }
}
