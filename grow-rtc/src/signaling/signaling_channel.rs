use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use grow_core::SignalingMessage;
use tokio::sync::{mpsc, watch};

use crate::error::SignalingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Connected,
    Disconnected,
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelState::Connecting => "connecting",
            ChannelState::Connected => "connected",
            ChannelState::Disconnected => "disconnected",
            ChannelState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// What the channel reports to its subscriber, in transport order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Connected and subscribed to the room topic. Raised on every
    /// (re)connect.
    Connected,
    Message(SignalingMessage),
    Disconnected,
    /// Reconnect attempts are exhausted; the channel has stopped.
    GaveUp { attempts: u32 },
}

/// Room-scoped publish/subscribe connection carrying [`SignalingMessage`]s.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Registers the handler for inbound events. A later call replaces the
    /// previous handler.
    async fn subscribe(&self, handler: mpsc::Sender<ChannelEvent>) -> Result<(), SignalingError>;

    /// Fails with [`SignalingError::NotConnected`] when the channel is not
    /// connected. Nothing is queued.
    async fn publish(&self, message: SignalingMessage) -> Result<(), SignalingError>;

    /// Idempotent.
    async fn disconnect(&self) -> Result<(), SignalingError>;

    fn state(&self) -> watch::Receiver<ChannelState>;
}

/// Counters kept by a channel.
#[derive(Debug, Default)]
pub struct ChannelStats {
    failed_publishes: AtomicU64,
    malformed_messages: AtomicU64,
    connects: AtomicU64,
}

impl ChannelStats {
    pub fn failed_publishes(&self) -> u64 {
        self.failed_publishes.load(Ordering::Relaxed)
    }

    pub fn malformed_messages(&self) -> u64 {
        self.malformed_messages.load(Ordering::Relaxed)
    }

    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    pub(crate) fn record_failed_publish(&self) {
        self.failed_publishes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed(&self) {
        self.malformed_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }
}
