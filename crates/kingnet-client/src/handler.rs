//! Consumers of received data.
//!
//! A [`Connection`](crate::Connection) delivers every received chunk and the
//! final disconnect to a [`ConnectionHandler`]. Two adapters are provided:
//!
//! - [`FnHandler`] builds a handler from a pair of closures
//! - [`ChannelHandler`] forwards everything into an mpsc channel so the
//!   consumer can drain events on its own task
//!
//! # Delivery Contract
//!
//! - `on_message` is called zero or more times, in stream order, never
//!   concurrently with itself or with `on_disconnected`
//! - `on_disconnected` is called exactly once after a successful connect,
//!   and nothing is delivered after it
//! - Both run on a runtime worker task, not on the caller's task, and should
//!   return quickly

use std::fmt;
use std::io;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;

/// Why a connection was torn down.
///
/// Informational only: whatever the cause, the handler is notified once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Server closed the stream (zero-byte read).
    PeerClosed,

    /// Reading from the stream failed.
    ReadFailed(io::ErrorKind),

    /// `close()` was called or the connection was dropped.
    LocalClose,

    /// The message handler panicked.
    ConsumerPanicked,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::PeerClosed => write!(f, "peer closed the connection"),
            DisconnectReason::ReadFailed(kind) => write!(f, "read failed: {}", kind),
            DisconnectReason::LocalClose => write!(f, "closed locally"),
            DisconnectReason::ConsumerPanicked => write!(f, "message handler panicked"),
        }
    }
}

/// Receiver of connection notifications.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// A chunk of bytes arrived. `payload` is an owned copy.
    fn on_message(&self, payload: Bytes);

    /// The connection is gone. Called exactly once.
    fn on_disconnected(&self, reason: DisconnectReason);
}

/// Handler built from two closures.
///
/// # Example
///
/// ```
/// use kingnet_client::{ConnectionHandler, DisconnectReason, FnHandler};
///
/// let handler = FnHandler::new(
///     |payload: bytes::Bytes| println!("received {} bytes", payload.len()),
///     |reason: DisconnectReason| println!("disconnected: {}", reason),
/// );
/// handler.on_disconnected(DisconnectReason::PeerClosed);
/// ```
pub struct FnHandler<M, D> {
    on_message: M,
    on_disconnected: D,
}

impl<M, D> FnHandler<M, D>
where
    M: Fn(Bytes) + Send + Sync + 'static,
    D: Fn(DisconnectReason) + Send + Sync + 'static,
{
    pub fn new(on_message: M, on_disconnected: D) -> Self {
        Self {
            on_message,
            on_disconnected,
        }
    }
}

impl<M, D> ConnectionHandler for FnHandler<M, D>
where
    M: Fn(Bytes) + Send + Sync + 'static,
    D: Fn(DisconnectReason) + Send + Sync + 'static,
{
    fn on_message(&self, payload: Bytes) {
        (self.on_message)(payload)
    }

    fn on_disconnected(&self, reason: DisconnectReason) {
        (self.on_disconnected)(reason)
    }
}

/// Event forwarded by [`ChannelHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Message(Bytes),
    Disconnected(DisconnectReason),
}

/// Handler that publishes events into an unbounded channel.
///
/// Unbounded on purpose: the receive loop never waits on the consumer.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ChannelHandler {
    /// Create a handler and the receiver its events go to.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn publish(&self, event: ConnectionEvent) {
        if self.tx.send(event).is_err() {
            trace!("Event receiver dropped, discarding event");
        }
    }
}

impl ConnectionHandler for ChannelHandler {
    fn on_message(&self, payload: Bytes) {
        self.publish(ConnectionEvent::Message(payload));
    }

    fn on_disconnected(&self, reason: DisconnectReason) {
        self.publish(ConnectionEvent::Disconnected(reason));
    }
}
