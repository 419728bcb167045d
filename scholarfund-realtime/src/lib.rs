//! Realtime connection-status broadcaster for the scholarfund dashboard
//!
//! This crate owns one long-lived subscription to the backend's realtime
//! change feed, tracks its lifecycle, and tells interested consumers when the
//! connection (re)stabilises so they can refetch anything they missed while
//! disconnected.
//!
//! # Features
//!
//! - Closed connection lifecycle (`CONNECTING`, `SUBSCRIBED`, `RECONNECTING`,
//!   `CLOSED`, `CHANNEL_ERROR`)
//! - Reconnect listeners registered by handle, invoked in order on every
//!   transition into `SUBSCRIBED`, with per-listener panic isolation
//! - Explicit reconnect policy (delay, backoff, attempt cap, jitter)
//! - `watch` channel for state observation
//! - Phoenix websocket transport and a manual transport for tests
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use scholarfund_realtime::{PhoenixConfig, PhoenixTransport, RealtimeStatusBroadcaster};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = PhoenixTransport::new(PhoenixConfig::new(
//!         "https://project.example.co",
//!         "public-anon-key",
//!     ))?;
//!
//!     let broadcaster = RealtimeStatusBroadcaster::new("realtime-status-monitor", Arc::new(transport));
//!
//!     // Refetch donations whenever the feed comes back
//!     let id = broadcaster.add_reconnect_listener(|| {
//!         println!("connection recovered, refreshing donations");
//!     });
//!
//!     broadcaster.start().await?;
//!     println!("status: {}", broadcaster.status());
//!
//!     broadcaster.remove_reconnect_listener(id);
//!     broadcaster.stop().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod broadcaster;
pub mod error;
pub mod indicator;
pub mod policy;
pub mod registry;
pub mod state;
pub mod transport;

// Re-exports
pub use broadcaster::RealtimeStatusBroadcaster;
pub use error::{RealtimeError, Result};
pub use indicator::{badge_text, IndicatorTone, StatusIndicator};
pub use policy::ReconnectPolicy;
pub use registry::{
    ListenerGuard, ListenerId, ListenerRegistry, ListenerSnapshot, NotifyReport, ReconnectListener,
};
pub use state::{ConnectionState, StatusChange, TransportStatus};
pub use transport::{
    ManualTransport, PhoenixConfig, PhoenixTransport, RealtimeTransport, StatusCallback,
    Subscription,
};
