//! Single outbound TCP connection.
//!
//! A [`Connection`] owns one stream, runs a receive loop over it and hands
//! every received chunk to a [`ConnectionHandler`]. Writes go through
//! [`Connection::send`] on the other half of the stream, so sending never
//! waits on the receive loop.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────── receive loop task ────────────┐
//!  TCP stream ──> │ read into scratch ─> copy ─> next read    │
//!                 └──────────────┬────────────────────────────┘
//!                                │ Bytes (ordered, unbounded)
//!                 ┌──────────────▼───── dispatcher task ──────┐
//!                 │ handler.on_message / on_disconnected      │
//!                 └───────────────────────────────────────────┘
//!  send() ──> write half (tokio Mutex) ──> TCP stream
//! ```
//!
//! # Design Principles
//!
//! - **No framing**: chunks are delivered as the socket returns them
//! - **No automatic retry**: a failed connect is returned to the caller
//! - **No read timeouts**: an idle server is not an error
//! - **One disconnect**: every cause of teardown funnels into a single
//!   `on_disconnected` call

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use kingnet_core::ConnectionConfig;
use kingnet_core::constants::SHUTDOWN_GRACE_MS;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream, lookup_host};
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::ConnectionError;
use crate::handler::{ChannelHandler, ConnectionEvent, ConnectionHandler, DisconnectReason};
use crate::receive::{self, Delivery};
use crate::state::ConnectionState;

pub(crate) type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Transfer counters, updated by the receive loop and the send path.
#[derive(Debug, Default)]
pub(crate) struct Stats {
    bytes_received: AtomicU64,
    chunks_received: AtomicU64,
    bytes_sent: AtomicU64,
}

impl Stats {
    pub(crate) fn record_received(&self, len: usize) {
        self.bytes_received.fetch_add(len as u64, Ordering::Relaxed);
        self.chunks_received.fetch_add(1, Ordering::Relaxed);
    }

    fn record_sent(&self, len: usize) {
        self.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
    }
}

/// Metadata fixed when the connection is established.
#[derive(Debug, Clone, Copy)]
struct Session {
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    connected_at: DateTime<Utc>,
}

/// State shared between the connection handle, the receive loop and the
/// dispatcher.
pub(crate) struct Shared {
    state: watch::Sender<ConnectionState>,
    /// Cancelled when teardown is requested or has started.
    shutdown: CancellationToken,
    /// First recorded teardown cause.
    reason: OnceLock<DisconnectReason>,
    /// Cancelled once `on_disconnected` has returned.
    finished: CancellationToken,
    writer: Mutex<Option<BoxedWriter>>,
    session: OnceLock<Session>,
    pub(crate) stats: Stats,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: watch::Sender::new(ConnectionState::Unconnected),
            shutdown: CancellationToken::new(),
            reason: OnceLock::new(),
            finished: CancellationToken::new(),
            writer: Mutex::new(None),
            session: OnceLock::new(),
            stats: Stats::default(),
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn transition(&self, to: ConnectionState) {
        let from = self.state.send_replace(to);
        debug_assert!(
            from.can_transition_to(to),
            "invalid transition {} -> {}",
            from,
            to
        );
        debug!("Connection state {} -> {}", from, to);
    }

    /// Ask the receive loop to tear down. Only the first reason sticks.
    pub(crate) fn request_close(&self, reason: DisconnectReason) {
        let _ = self.reason.set(reason);
        self.shutdown.cancel();
    }

    pub(crate) fn shutdown_requested(&self) -> impl Future<Output = ()> + '_ {
        self.shutdown.cancelled()
    }

    pub(crate) fn requested_reason(&self) -> DisconnectReason {
        self.reason
            .get()
            .copied()
            .unwrap_or(DisconnectReason::LocalClose)
    }

    /// Close the stream and mark the connection disconnected.
    ///
    /// Called once, by the receive loop, after it has stopped reading and
    /// dropped its half of the stream. Returns the reason that will be
    /// reported to the handler.
    pub(crate) async fn teardown(&self, reason: DisconnectReason) -> DisconnectReason {
        let reason = *self.reason.get_or_init(|| reason);

        // Releases any send blocked on a full socket buffer.
        self.shutdown.cancel();

        if let Some(mut writer) = self.writer.lock().await.take() {
            let grace = Duration::from_millis(SHUTDOWN_GRACE_MS);
            match tokio::time::timeout(grace, writer.shutdown()).await {
                Ok(Ok(())) => {
                    debug!("Shutdown completed successfully");
                }
                Ok(Err(e)) => {
                    debug!("Error during shutdown: {}", e);
                }
                Err(_) => {
                    warn!("Shutdown timeout during teardown ({}ms)", grace.as_millis());
                }
            }
        }

        self.transition(ConnectionState::Disconnected);
        info!(%reason, "Disconnected from server");
        reason
    }

    pub(crate) fn mark_finished(&self) {
        self.finished.cancel();
    }
}

/// Restores `Unconnected` if establishment does not complete, including when
/// the `connect` future is dropped midway.
struct ConnectingGuard<'a> {
    shared: &'a Shared,
    armed: bool,
}

impl ConnectingGuard<'_> {
    fn complete(mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.transition(ConnectionState::Unconnected);
        }
    }
}

/// Connection information snapshot
///
/// Read-only view of connection metadata for monitoring and debugging.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Current lifecycle state
    pub state: ConnectionState,

    /// Remote address, when the stream is a TCP socket
    pub peer_addr: Option<SocketAddr>,

    /// Local address, when the stream is a TCP socket
    pub local_addr: Option<SocketAddr>,

    /// When the connection was established
    pub connected_at: DateTime<Utc>,

    /// Time since the connection was established
    pub uptime: chrono::Duration,

    /// Total bytes read from the stream
    pub bytes_received: u64,

    /// Number of non-empty reads
    pub chunks_received: u64,

    /// Total bytes written by `send`
    pub bytes_sent: u64,
}

/// Client side of one TCP session.
///
/// # Connection Lifecycle
///
/// 1. Create with [`new`](Self::new) or [`with_channel`](Self::with_channel)
/// 2. Establish with [`connect`](Self::connect) (or [`attach`](Self::attach)
///    an existing stream)
/// 3. Receive through the handler, write with [`send`](Self::send)
/// 4. Stop with [`close`](Self::close), or let the server close
///
/// A `Connection` is single-use: once disconnected it stays disconnected.
///
/// # Thread Safety
///
/// All methods take `&self`; wrap the connection in an `Arc` to send from
/// several tasks at once.
///
/// # Example
///
/// ```no_run
/// use kingnet_client::{Connection, ConnectionEvent};
/// use kingnet_core::ConnectionConfig;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (connection, mut events) = Connection::with_channel(ConnectionConfig::default());
/// connection.connect("127.0.0.1", 7171).await?;
///
/// connection.send(&b"hello"[..]).await?;
///
/// while let Some(event) = events.recv().await {
///     match event {
///         ConnectionEvent::Message(payload) => println!("{} bytes", payload.len()),
///         ConnectionEvent::Disconnected(reason) => {
///             println!("disconnected: {}", reason);
///             break;
///         }
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct Connection<H: ConnectionHandler> {
    config: ConnectionConfig,
    handler: Arc<H>,
    shared: Arc<Shared>,
}

impl Connection<ChannelHandler> {
    /// Create a connection whose events are published to a channel.
    pub fn with_channel(
        config: ConnectionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (handler, events) = ChannelHandler::new();
        (Self::new(config, handler), events)
    }
}

impl<H: ConnectionHandler> Connection<H> {
    /// Create an unconnected connection.
    ///
    /// The configuration is validated when connecting.
    pub fn new(config: ConnectionConfig, handler: H) -> Self {
        debug!(
            max_message_buffer = config.max_message_buffer,
            "Creating connection"
        );

        Self {
            config,
            handler: Arc::new(handler),
            shared: Arc::new(Shared::new()),
        }
    }

    /// Configuration this connection was created with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Handler receiving this connection's notifications.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Connect to `address:port` and start receiving.
    ///
    /// Resolves `address`, then tries each resolved socket address in turn
    /// with `TCP_NODELAY` (unless disabled) and socket buffers sized to
    /// `max_message_buffer`. On success the receive loop is running with one
    /// read outstanding.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::InvalidState`] unless the connection is
    ///   `Unconnected`
    /// - [`ConnectionError::InvalidPort`] for port 0
    /// - [`ConnectionError::Config`] for an invalid configuration
    /// - [`ConnectionError::Resolve`] / [`ConnectionError::NoAddresses`] when
    ///   the host does not resolve
    /// - [`ConnectionError::Connect`] when every address refuses or fails
    /// - [`ConnectionError::ConnectTimeout`] when `connect_timeout_ms` elapses
    ///
    /// On error no receive loop is started and the connection goes back to
    /// `Unconnected`.
    pub async fn connect(&self, address: &str, port: u16) -> Result<(), ConnectionError> {
        if port == 0 {
            return Err(ConnectionError::InvalidPort(port));
        }
        self.config.validate()?;
        let guard = self.begin_connecting()?;

        info!("Connecting to server at {}:{}", address, port);

        let establish = establish(address, port, &self.config);
        let result = match self.config.connect_timeout() {
            Some(timeout) => match tokio::time::timeout(timeout, establish).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Connection timeout after {}ms", timeout.as_millis());
                    Err(ConnectionError::ConnectTimeout(timeout.as_millis() as u64))
                }
            },
            None => establish.await,
        };

        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                error!("Connection failed: {}", e);
                return Err(e);
            }
        };

        let peer_addr = stream.peer_addr().ok();
        let local_addr = stream.local_addr().ok();
        let (reader, writer) = stream.into_split();
        self.start(Box::new(reader), Box::new(writer), peer_addr, local_addr)
            .await;
        guard.complete();

        info!("Successfully connected to {}:{}", address, port);
        Ok(())
    }

    /// Start the receive loop over an already established stream.
    ///
    /// Same lifecycle as [`connect`](Self::connect) without the socket
    /// setup. Useful for streams that are not plain TCP.
    pub async fn attach<S>(&self, stream: S) -> Result<(), ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.config.validate()?;
        let guard = self.begin_connecting()?;

        let (reader, writer) = tokio::io::split(stream);
        self.start(Box::new(reader), Box::new(writer), None, None)
            .await;
        guard.complete();

        debug!("Attached to stream");
        Ok(())
    }

    /// Write `data` to the server.
    ///
    /// Returns once the payload has been handed to the operating system.
    /// Does not wait for the receive loop; concurrent sends are written one
    /// after another. A failed send does not close the connection.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::EmptyPayload`] for an empty payload
    /// - [`ConnectionError::PayloadTooLarge`] above `max_message_buffer`
    /// - [`ConnectionError::NotConnected`] unless connected, or if the
    ///   connection is torn down while the write is pending
    /// - [`ConnectionError::SendFailed`] when the write itself fails
    pub async fn send(&self, data: impl Into<Bytes>) -> Result<(), ConnectionError> {
        let data = data.into();

        if data.is_empty() {
            return Err(ConnectionError::EmptyPayload);
        }
        if data.len() > self.config.max_message_buffer {
            return Err(ConnectionError::PayloadTooLarge {
                len: data.len(),
                max: self.config.max_message_buffer,
            });
        }
        if self.shared.state() != ConnectionState::Connected
            || self.shared.shutdown.is_cancelled()
        {
            return Err(ConnectionError::NotConnected);
        }

        trace!(len = data.len(), "Sending payload to server");

        // Once close is requested no further bytes may reach the peer.
        let shutdown = &self.shared.shutdown;
        let mut guard = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(ConnectionError::NotConnected),
            guard = self.shared.writer.lock() => guard,
        };
        let writer = guard.as_mut().ok_or(ConnectionError::NotConnected)?;

        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(ConnectionError::NotConnected),
            result = async {
                writer.write_all(&data).await?;
                writer.flush().await
            } => result,
        };

        match result {
            Ok(()) => {
                self.shared.stats.record_sent(data.len());
                trace!("Payload sent successfully");
                Ok(())
            }
            Err(e) => {
                error!("Failed to send payload: {}", e);
                Err(ConnectionError::SendFailed(e))
            }
        }
    }

    /// Close the connection and wait for the disconnect notification.
    ///
    /// Idempotent. Does nothing unless the connection has been established.
    pub async fn close(&self) {
        match self.shared.state() {
            ConnectionState::Unconnected | ConnectionState::Connecting => {
                debug!("Close requested before connecting, ignoring");
                return;
            }
            ConnectionState::Connected => {
                info!("Closing connection");
                self.shared.request_close(DisconnectReason::LocalClose);
            }
            ConnectionState::Disconnected => {}
        }

        self.closed().await;
    }

    /// Wait until the handler has received its disconnect notification.
    ///
    /// Never resolves for a connection that is never established.
    pub async fn closed(&self) {
        self.shared.finished.cancelled().await;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Whether the stream is established and not yet torn down.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Subscribe to state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Snapshot of connection metadata, once established.
    pub fn info(&self) -> Option<ConnectionInfo> {
        let session = self.shared.session.get()?;
        let stats = &self.shared.stats;

        Some(ConnectionInfo {
            state: self.state(),
            peer_addr: session.peer_addr,
            local_addr: session.local_addr,
            connected_at: session.connected_at,
            uptime: Utc::now() - session.connected_at,
            bytes_received: stats.bytes_received.load(Ordering::Relaxed),
            chunks_received: stats.chunks_received.load(Ordering::Relaxed),
            bytes_sent: stats.bytes_sent.load(Ordering::Relaxed),
        })
    }

    fn begin_connecting(&self) -> Result<ConnectingGuard<'_>, ConnectionError> {
        let mut current = ConnectionState::Unconnected;
        let started = self.shared.state.send_if_modified(|state| {
            current = *state;
            if *state == ConnectionState::Unconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });

        if !started {
            if current.is_terminal() {
                warn!("Connect attempted on a closed connection");
            } else {
                warn!("Connect attempted in state {}", current);
            }
            return Err(ConnectionError::InvalidState(current));
        }

        Ok(ConnectingGuard {
            shared: &self.shared,
            armed: true,
        })
    }

    async fn start(
        &self,
        reader: BoxedReader,
        writer: BoxedWriter,
        peer_addr: Option<SocketAddr>,
        local_addr: Option<SocketAddr>,
    ) {
        *self.shared.writer.lock().await = Some(writer);
        let _ = self.shared.session.set(Session {
            peer_addr,
            local_addr,
            connected_at: Utc::now(),
        });
        self.shared.transition(ConnectionState::Connected);

        let (deliveries_tx, deliveries_rx) = mpsc::unbounded_channel::<Delivery>();

        tokio::spawn(receive::dispatch(
            self.handler.clone(),
            deliveries_rx,
            self.shared.clone(),
        ));
        tokio::spawn(receive::receive_loop(
            reader,
            self.config.max_message_buffer,
            self.shared.clone(),
            deliveries_tx,
        ));
    }
}

impl<H: ConnectionHandler> Drop for Connection<H> {
    fn drop(&mut self) {
        if self.shared.state() == ConnectionState::Connected {
            debug!("Connection dropped while connected - closing");
            self.shared.request_close(DisconnectReason::LocalClose);
        }
    }
}

/// Resolve `address` and connect to the first address that accepts.
async fn establish(
    address: &str,
    port: u16,
    config: &ConnectionConfig,
) -> Result<TcpStream, ConnectionError> {
    let addrs = lookup_host((address, port))
        .await
        .map_err(|source| ConnectionError::Resolve {
            host: address.to_string(),
            source,
        })?;

    let mut last_error = None;
    for addr in addrs {
        match connect_addr(addr, config).await {
            Ok(stream) => return Ok(stream),
            Err(source) => {
                debug!("Connection attempt to {} failed: {}", addr, source);
                last_error = Some(ConnectionError::Connect { addr, source });
            }
        }
    }

    Err(last_error.unwrap_or_else(|| ConnectionError::NoAddresses(address.to_string())))
}

async fn connect_addr(addr: SocketAddr, config: &ConnectionConfig) -> std::io::Result<TcpStream> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };

    let size = config.socket_buffer_size();
    if let Err(e) = socket.set_recv_buffer_size(size) {
        warn!("Failed to set receive buffer size to {}: {}", size, e);
    }
    if let Err(e) = socket.set_send_buffer_size(size) {
        warn!("Failed to set send buffer size to {}: {}", size, e);
    }

    let stream = socket.connect(addr).await?;

    // Payloads are written unframed and should leave immediately.
    if let Err(e) = stream.set_nodelay(config.nodelay) {
        warn!("Failed to set TCP_NODELAY: {} - latency may be impacted", e);
    }

    Ok(stream)
}
