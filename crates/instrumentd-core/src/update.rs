//! Config-update ingestion channel.
//!
//! Bounded, multi-producer, single-consumer. Producers block when the
//! channel is full; the manager loop is the only consumer.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{InstrumentationError, Result};
use crate::types::{PodWorkload, SdkConfig};

/// A configuration change for one workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    /// Target workload.
    pub workload: PodWorkload,
    /// Language-scoped SDK configs. Entries without a language are ignored.
    #[serde(default)]
    pub sdk_configs: Vec<SdkConfig>,
}

impl ConfigUpdate {
    /// Creates an update with no entries.
    #[must_use]
    pub const fn new(workload: PodWorkload) -> Self {
        Self {
            workload,
            sdk_configs: Vec::new(),
        }
    }

    /// Adds a language-scoped config entry.
    #[must_use]
    pub fn with_config(mut self, config: SdkConfig) -> Self {
        self.sdk_configs.push(config);
        self
    }
}

/// Creates a bounded config-update channel.
///
/// A capacity of zero is raised to one; tokio channels require a
/// non-zero bound.
#[must_use]
pub fn config_update_channel(capacity: usize) -> (ConfigUpdateSender, ConfigUpdateReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ConfigUpdateSender { tx }, ConfigUpdateReceiver { rx })
}

/// Producer half of the config-update channel.
#[derive(Debug, Clone)]
pub struct ConfigUpdateSender {
    tx: mpsc::Sender<ConfigUpdate>,
}

impl ConfigUpdateSender {
    /// Sends an update, waiting while the channel is full.
    ///
    /// # Errors
    /// Returns [`InstrumentationError::ChannelClosed`] if the manager is gone.
    pub async fn send(&self, update: ConfigUpdate) -> Result<()> {
        self.tx
            .send(update)
            .await
            .map_err(|_| InstrumentationError::ChannelClosed("config updates".into()))
    }

    /// Sends without waiting.
    ///
    /// # Errors
    /// Returns [`InstrumentationError::Timeout`] with a zero duration if the
    /// channel is full, or `ChannelClosed` if the manager is gone.
    pub fn try_send(&self, update: ConfigUpdate) -> Result<()> {
        self.tx.try_send(update).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => InstrumentationError::Timeout(Duration::ZERO),
            mpsc::error::TrySendError::Closed(_) => {
                InstrumentationError::ChannelClosed("config updates".into())
            }
        })
    }

    /// Sends, giving up once `timeout` elapses.
    ///
    /// # Errors
    /// Returns [`InstrumentationError::Timeout`] on deadline, or
    /// `ChannelClosed` if the manager is gone.
    pub async fn send_timeout(&self, update: ConfigUpdate, timeout: Duration) -> Result<()> {
        self.tx.send_timeout(update, timeout).await.map_err(|e| match e {
            mpsc::error::SendTimeoutError::Timeout(_) => InstrumentationError::Timeout(timeout),
            mpsc::error::SendTimeoutError::Closed(_) => {
                InstrumentationError::ChannelClosed("config updates".into())
            }
        })
    }

    /// Returns true once the receiver has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half of the config-update channel, owned by the manager loop.
#[derive(Debug)]
pub struct ConfigUpdateReceiver {
    rx: mpsc::Receiver<ConfigUpdate>,
}

impl ConfigUpdateReceiver {
    /// Receives the next update. `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<ConfigUpdate> {
        self.rx.recv().await
    }

    /// Closes the channel; buffered updates can still be drained.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
