//! Presentation of the connection state for a status badge.

use serde::Serialize;

use crate::state::ConnectionState;

/// Colour family of the indicator dot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorTone {
    Green,
    Yellow,
    Gray,
    Red,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusIndicator {
    pub text: &'static str,
    pub tone: IndicatorTone,
    /// Animated ping around the dot while the connection is active or recovering
    pub pulsing: bool,
}

impl StatusIndicator {
    pub fn for_state(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Subscribed => Self {
                text: "Live",
                tone: IndicatorTone::Green,
                pulsing: true,
            },
            ConnectionState::Reconnecting => Self {
                text: "Reconnecting...",
                tone: IndicatorTone::Yellow,
                pulsing: true,
            },
            ConnectionState::Connecting => Self {
                text: "Connecting...",
                tone: IndicatorTone::Gray,
                pulsing: true,
            },
            ConnectionState::Closed | ConnectionState::ChannelError => Self {
                text: "Lost Connection",
                tone: IndicatorTone::Red,
                pulsing: false,
            },
        }
    }
}

impl std::fmt::Display for StatusIndicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let dot = match self.tone {
            IndicatorTone::Green => "●",
            IndicatorTone::Yellow => "◐",
            IndicatorTone::Gray => "○",
            IndicatorTone::Red => "✕",
        };
        write!(f, "{} {}", dot, self.text)
    }
}

/// Compact badge text: "Live" when subscribed, the raw state name otherwise
pub fn badge_text(state: ConnectionState) -> String {
    if state.is_live() {
        "Live".to_string()
    } else {
        state.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indicator_mapping() {
        let live = StatusIndicator::for_state(ConnectionState::Subscribed);
        assert_eq!(live.text, "Live");
        assert_eq!(live.tone, IndicatorTone::Green);
        assert!(live.pulsing);

        let reconnecting = StatusIndicator::for_state(ConnectionState::Reconnecting);
        assert_eq!(reconnecting.text, "Reconnecting...");
        assert_eq!(reconnecting.tone, IndicatorTone::Yellow);

        let connecting = StatusIndicator::for_state(ConnectionState::Connecting);
        assert_eq!(connecting.tone, IndicatorTone::Gray);
        assert!(connecting.pulsing);
    }

    #[test]
    fn test_lost_connection_states() {
        for state in [ConnectionState::Closed, ConnectionState::ChannelError] {
            let indicator = StatusIndicator::for_state(state);
            assert_eq!(indicator.text, "Lost Connection");
            assert_eq!(indicator.tone, IndicatorTone::Red);
            assert!(!indicator.pulsing);
        }
    }

    #[test]
    fn test_badge_text() {
        assert_eq!(badge_text(ConnectionState::Subscribed), "Live");
        assert_eq!(badge_text(ConnectionState::ChannelError), "CHANNEL_ERROR");
    }
}
