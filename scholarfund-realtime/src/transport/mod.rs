//! Realtime transport abstraction.
//!
//! A transport opens one logical channel and reports its lifecycle through a
//! status callback. The callback may run on any thread and at any time until
//! the subscription is released with [`RealtimeTransport::unsubscribe`].

pub mod manual;
pub mod phoenix;

use std::sync::Arc;

use crate::error::Result;
use crate::state::TransportStatus;

pub use manual::ManualTransport;
pub use phoenix::{PhoenixConfig, PhoenixTransport};

/// Receives status notifications for one subscription
pub type StatusCallback = Arc<dyn Fn(TransportStatus) + Send + Sync + 'static>;

/// Handle to an open channel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: u64,
    channel: String,
}

impl Subscription {
    pub fn new(id: u64, channel: impl Into<String>) -> Self {
        Self {
            id,
            channel: channel.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

pub trait RealtimeTransport: Send + Sync {
    /// Open `channel`; statuses are delivered to `on_status` asynchronously
    fn subscribe(&self, channel: &str, on_status: StatusCallback) -> Result<Subscription>;

    /// Release the channel. No status is delivered for it afterwards.
    fn unsubscribe(&self, subscription: Subscription);
}
