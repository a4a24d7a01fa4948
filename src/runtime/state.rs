//! Connection lifecycle states

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a server's connection is in its lifecycle.
///
/// ```text
/// Disconnected --connect--> Connecting --ok--> Connected
/// Connecting --retries exhausted--> Disconnected
/// Connected --ping miss--> Unhealthy --ping ok--> Connected
/// Connected|Unhealthy --miss threshold--> Reconnecting
/// Reconnecting --ok--> Connected
/// Reconnecting --retries exhausted--> Failed
/// any --disconnect--> Disconnected
/// Failed --connect--> Connecting
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Unhealthy,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is an edge of the lifecycle graph.
    ///
    /// Every state may move to `Disconnected` (explicit disconnect).
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        if next == Disconnected {
            return true;
        }

        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Failed, Connecting)
                | (Connecting, Connected)
                | (Connected, Unhealthy)
                | (Unhealthy, Connected)
                | (Connected, Reconnecting)
                | (Unhealthy, Reconnecting)
                | (Reconnecting, Connected)
                | (Reconnecting, Failed)
        )
    }

    /// A live session exists in this state.
    pub fn has_session(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Unhealthy)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Unhealthy => "unhealthy",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
