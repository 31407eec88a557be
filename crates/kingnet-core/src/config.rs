//! Connection configuration.
//!
//! [`ConnectionConfig`] carries the per-connection limits that used to be a
//! process-wide constant. It is passed into the client at construction, so
//! two connections in the same process may use different buffer sizes.
//!
//! # Examples
//!
//! ```
//! use kingnet_core::ConnectionConfig;
//! use std::time::Duration;
//!
//! let config = ConnectionConfig::default()
//!     .with_max_message_buffer(8192)
//!     .with_connect_timeout(Duration::from_millis(1500));
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.connect_timeout(), Some(Duration::from_millis(1500)));
//! ```
//!
//! Configuration can also be deserialized; missing fields take their
//! defaults:
//!
//! ```
//! use kingnet_core::ConnectionConfig;
//!
//! let config: ConnectionConfig = serde_json::from_str(r#"{ "max_message_buffer": 512 }"#).unwrap();
//! assert_eq!(config.max_message_buffer, 512);
//! assert!(config.nodelay);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_MAX_MESSAGE_BUFFER, DEFAULT_NODELAY, MAX_SOCKET_BUFFER, MIN_MESSAGE_BUFFER,
};
use crate::{Error, Result};

/// Configuration for a single client connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Maximum size of one received chunk and of one sent payload.
    ///
    /// Also used for the kernel receive/send buffer sizes.
    pub max_message_buffer: usize,

    /// Disable Nagle's algorithm on the socket.
    pub nodelay: bool,

    /// Upper bound on resolving and connecting, in milliseconds.
    ///
    /// `None` waits as long as the operating system does.
    pub connect_timeout_ms: Option<u64>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_message_buffer: DEFAULT_MAX_MESSAGE_BUFFER,
            nodelay: DEFAULT_NODELAY,
            connect_timeout_ms: None,
        }
    }
}

impl ConnectionConfig {
    /// Set the maximum message buffer size.
    pub fn with_max_message_buffer(mut self, size: usize) -> Self {
        self.max_message_buffer = size;
        self
    }

    /// Enable or disable `TCP_NODELAY`.
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Bound the connection establishment phase.
    ///
    /// Stored in whole milliseconds; a non-zero timeout below one
    /// millisecond rounds up to one.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.connect_timeout_ms = Some(if ms == 0 && !timeout.is_zero() { 1 } else { ms });
        self
    }

    /// Connection establishment timeout, if any.
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    /// Socket buffer size to request from the kernel.
    ///
    /// Always fits in `u32` once [`validate`](Self::validate) has passed.
    pub fn socket_buffer_size(&self) -> u32 {
        u32::try_from(self.max_message_buffer).unwrap_or(u32::MAX)
    }

    /// Check that the configuration is usable.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidBufferSize`] if `max_message_buffer` is outside
    ///   `MIN_MESSAGE_BUFFER..=MAX_SOCKET_BUFFER`
    /// - [`Error::InvalidTimeout`] if the connect timeout is zero
    pub fn validate(&self) -> Result<()> {
        if !(MIN_MESSAGE_BUFFER..=MAX_SOCKET_BUFFER).contains(&self.max_message_buffer) {
            return Err(Error::InvalidBufferSize {
                size: self.max_message_buffer,
                min: MIN_MESSAGE_BUFFER,
                max: MAX_SOCKET_BUFFER,
            });
        }

        if self.connect_timeout_ms == Some(0) {
            return Err(Error::InvalidTimeout(0));
        }

        Ok(())
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
