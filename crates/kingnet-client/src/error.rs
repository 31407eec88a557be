use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::state::ConnectionState;

/// Errors returned by [`Connection`](crate::Connection) operations.
///
/// Only one-shot operations (`connect`, `attach`, `send`) return errors.
/// Failures inside the receive loop are reported through the handler's
/// disconnect notification instead.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Port 0 cannot be connected to
    #[error("Invalid port: {0}")]
    InvalidPort(u16),

    /// Connection configuration failed validation
    #[error("Invalid configuration: {0}")]
    Config(#[from] kingnet_core::Error),

    /// Operation is not valid in the current connection state
    #[error("Operation not valid in state {0}")]
    InvalidState(ConnectionState),

    /// Host name could not be resolved
    #[error("Failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    /// Host name resolved to nothing
    #[error("No addresses found for {0}")]
    NoAddresses(String),

    /// Every resolved address refused or failed; holds the last attempt
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Connection establishment timed out
    #[error("Connection timeout after {0}ms")]
    ConnectTimeout(u64),

    /// Client is not connected to server
    #[error("Not connected to server")]
    NotConnected,

    /// Empty payloads are not sent
    #[error("Payload is empty")]
    EmptyPayload,

    /// Payload exceeds the configured maximum message buffer
    #[error("Payload of {len} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },

    /// Write to the stream failed
    #[error("Send failed: {0}")]
    SendFailed(#[source] io::Error),
}
