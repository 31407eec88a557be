//! Connection lifecycle states.
//!
//! # Valid Transitions
//!
//! - Unconnected → Connecting → Connected → Disconnected
//! - Connecting → Unconnected (establishment failed, caller may try again)
//!
//! `Disconnected` is terminal: a connection that has been torn down is never
//! reused.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a [`Connection`](crate::Connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No socket yet.
    Unconnected,

    /// Resolving and connecting.
    Connecting,

    /// Socket established and receive loop running.
    Connected,

    /// Torn down. Terminal.
    Disconnected,
}

impl ConnectionState {
    /// Whether no further transition can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Disconnected)
    }

    /// Whether `from → to` is allowed.
    pub fn can_transition_to(&self, to: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, to),
            (Unconnected, Connecting)
                | (Connecting, Unconnected)
                | (Connecting, Connected)
                | (Connected, Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state_str = match self {
            ConnectionState::Unconnected => "Unconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnected => "Disconnected",
        };
        write!(f, "{}", state_str)
    }
}
