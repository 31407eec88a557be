//! Core constants for the KingNet client.
//!
//! This module centralizes the sizing limits used by the connection layer.
//! The values here are defaults only: every `Connection` receives its
//! limits through a [`ConnectionConfig`] at construction, so nothing in the
//! client reads these constants as ambient global state.
//!
//! # Usage
//!
//! ```
//! use kingnet_core::constants::*;
//!
//! assert!(DEFAULT_MAX_MESSAGE_BUFFER >= MIN_MESSAGE_BUFFER);
//! assert!(DEFAULT_MAX_MESSAGE_BUFFER <= MAX_SOCKET_BUFFER);
//! ```
//!
//! [`ConnectionConfig`]: crate::ConnectionConfig

// ============================================================================
// Buffer Sizing
// ============================================================================

/// Default maximum message buffer size (bytes).
///
/// Sizes the scratch receive buffer, the kernel socket buffers and the
/// largest payload accepted by a single send.
///
/// # Value: 4096 bytes
///
/// # Examples
///
/// ```
/// use kingnet_core::constants::DEFAULT_MAX_MESSAGE_BUFFER;
///
/// let scratch = vec![0u8; DEFAULT_MAX_MESSAGE_BUFFER];
/// assert_eq!(scratch.len(), 4096);
/// ```
pub const DEFAULT_MAX_MESSAGE_BUFFER: usize = 4096;

/// Smallest accepted message buffer size (bytes).
///
/// # Value: 1 byte
pub const MIN_MESSAGE_BUFFER: usize = 1;

/// Largest accepted message buffer size (bytes).
///
/// Socket buffer sizes are passed to the kernel as `u32`, and most
/// platforms clamp far below this anyway.
///
/// # Value: 16 MiB
pub const MAX_SOCKET_BUFFER: usize = 16 * 1024 * 1024;

// ============================================================================
// Connection Defaults
// ============================================================================

/// Whether `TCP_NODELAY` is enabled by default.
///
/// Chunks are written as soon as `send` is called; waiting for Nagle
/// coalescing would add 40-200ms to small payloads.
pub const DEFAULT_NODELAY: bool = true;

/// Grace period for flushing and shutting down the write half on close
/// (milliseconds).
///
/// # Value: 500ms
pub const SHUTDOWN_GRACE_MS: u64 = 500;
