//! Sink boundary: where accepted channel values go.
//!
//! The acquisition loop reports values through the narrow [`ChannelSink`]
//! trait; any exposure technology can sit behind it. The crate ships a
//! broadcast-channel implementation for fan-out to in-process subscribers
//! and a recording implementation for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};

use crate::error::GatewayResult;

/// One republished channel value.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelUpdate {
    /// UTC timestamp when the value was republished.
    pub timestamp: DateTime<Utc>,
    /// Channel index, 1..=10.
    pub channel: usize,
    /// Measured value.
    pub value: f64,
}

/// Receives per-channel values from the acquisition loop.
///
/// Implementations must not block the tick indefinitely; apply a bounded
/// timeout internally where delivery can stall.
#[async_trait]
pub trait ChannelSink: Send + Sync {
    /// Report one value for the given channel index (1..=10).
    async fn write(&self, channel: usize, value: f64) -> GatewayResult<()>;
}

/// Fans channel updates out to any number of in-process subscribers.
pub struct BroadcastSink {
    tx: broadcast::Sender<ChannelUpdate>,
}

impl BroadcastSink {
    /// Create a sink with the given broadcast capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to the update stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelUpdate> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl ChannelSink for BroadcastSink {
    async fn write(&self, channel: usize, value: f64) -> GatewayResult<()> {
        let update = ChannelUpdate {
            timestamp: Utc::now(),
            channel,
            value,
        };
        // No subscribers is not a failure.
        let _ = self.tx.send(update);
        Ok(())
    }
}

/// Records every write, in order. Test support.
#[derive(Default)]
pub struct RecordingSink {
    updates: Mutex<Vec<(usize, f64)>>,
}

impl RecordingSink {
    /// Create an empty recording sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every `(channel, value)` written so far.
    pub async fn snapshot(&self) -> Vec<(usize, f64)> {
        self.updates.lock().await.clone()
    }

    /// Number of writes so far.
    pub async fn len(&self) -> usize {
        self.updates.lock().await.len()
    }

    /// Whether nothing has been written yet.
    pub async fn is_empty(&self) -> bool {
        self.updates.lock().await.is_empty()
    }
}

#[async_trait]
impl ChannelSink for RecordingSink {
    async fn write(&self, channel: usize, value: f64) -> GatewayResult<()> {
        self.updates.lock().await.push((channel, value));
        Ok(())
    }
}
