use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle stage of the realtime connection as seen by consumers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    #[default]
    Connecting,
    Subscribed,
    Reconnecting,
    Closed,
    ChannelError,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Subscribed => "SUBSCRIBED",
            ConnectionState::Reconnecting => "RECONNECTING",
            ConnectionState::Closed => "CLOSED",
            ConnectionState::ChannelError => "CHANNEL_ERROR",
        }
    }

    /// Whether the connection is currently delivering changes
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Subscribed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status reported by a transport for one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportStatus {
    Subscribed,
    TimedOut,
    ChannelError,
    Closed,
}

impl TransportStatus {
    /// State the broadcaster enters when this status arrives.
    ///
    /// Timeouts and channel errors collapse into a single error state.
    pub fn target_state(&self) -> ConnectionState {
        match self {
            TransportStatus::Subscribed => ConnectionState::Subscribed,
            TransportStatus::TimedOut | TransportStatus::ChannelError => {
                ConnectionState::ChannelError
            }
            TransportStatus::Closed => ConnectionState::Closed,
        }
    }

    /// Parse the lowercase names used by scripted simulations
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "subscribed" => Some(Self::Subscribed),
            "timed_out" | "timeout" => Some(Self::TimedOut),
            "channel_error" | "error" => Some(Self::ChannelError),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportStatus::Subscribed => write!(f, "subscribed"),
            TransportStatus::TimedOut => write!(f, "timed_out"),
            TransportStatus::ChannelError => write!(f, "channel_error"),
            TransportStatus::Closed => write!(f, "closed"),
        }
    }
}

/// One observed state change, published on the broadcaster's watch channel
#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    pub state: ConnectionState,
    pub previous: Option<ConnectionState>,
    pub at: DateTime<Utc>,
}

impl StatusChange {
    pub(crate) fn initial() -> Self {
        Self {
            state: ConnectionState::Connecting,
            previous: None,
            at: Utc::now(),
        }
    }

    pub(crate) fn transition(previous: ConnectionState, state: ConnectionState) -> Self {
        Self {
            state,
            previous: Some(previous),
            at: Utc::now(),
        }
    }
}
