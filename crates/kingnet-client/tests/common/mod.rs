//! Common test utilities for connection integration tests.
//!
//! - **Servers**: `bind_listener` gives a loopback listener on a free port
//! - **Handlers**: `RecordingHandler` counts notifications and records
//!   ordering violations
//! - **Stream doubles**: `InstrumentedStream` counts outstanding reads,
//!   `ScriptedStream` fails reads or writes on demand

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use kingnet_client::{ConnectionEvent, ConnectionHandler, DisconnectReason};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Upper bound for any single wait in the tests.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Bind a listener on an ephemeral loopback port.
pub async fn bind_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Wait for the next event, failing the test if none arrives in time.
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> ConnectionEvent {
    tokio::time::timeout(TEST_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for connection event")
        .expect("event channel closed")
}

/// Drain events until the disconnect, returning all received bytes in order.
pub async fn drain_until_disconnect(
    events: &mut mpsc::UnboundedReceiver<ConnectionEvent>,
) -> (Vec<Bytes>, DisconnectReason) {
    let mut chunks = Vec::new();
    loop {
        match next_event(events).await {
            ConnectionEvent::Message(payload) => chunks.push(payload),
            ConnectionEvent::Disconnected(reason) => return (chunks, reason),
        }
    }
}

/// Concatenate received chunks.
pub fn concat(chunks: &[Bytes]) -> Vec<u8> {
    chunks.iter().flat_map(|c| c.iter().copied()).collect()
}

/// Handler that records notifications for later assertions.
#[derive(Default)]
pub struct RecordingHandler {
    pub messages: Mutex<Vec<Bytes>>,
    pub disconnects: AtomicUsize,
    pub reason: Mutex<Option<DisconnectReason>>,
    /// Set if a message ever arrives after the disconnect.
    pub message_after_disconnect: AtomicBool,
    /// Panic inside `on_message` when set.
    pub panic_on_message: AtomicBool,
    /// Panic inside `on_disconnected` when set.
    pub panic_on_disconnect: AtomicBool,
}

impl RecordingHandler {
    pub fn panicking() -> Self {
        let handler = Self::default();
        handler.panic_on_message.store(true, Ordering::SeqCst);
        handler
    }

    pub fn panicking_on_disconnect() -> Self {
        let handler = Self::default();
        handler.panic_on_disconnect.store(true, Ordering::SeqCst);
        handler
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<DisconnectReason> {
        *self.reason.lock().unwrap()
    }
}

impl ConnectionHandler for RecordingHandler {
    fn on_message(&self, payload: Bytes) {
        if self.disconnects.load(Ordering::SeqCst) > 0 {
            self.message_after_disconnect.store(true, Ordering::SeqCst);
        }
        if self.panic_on_message.load(Ordering::SeqCst) {
            panic!("handler failure");
        }
        self.messages.lock().unwrap().push(payload);
    }

    fn on_disconnected(&self, reason: DisconnectReason) {
        *self.reason.lock().unwrap() = Some(reason);
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_disconnect.load(Ordering::SeqCst) {
            panic!("disconnect handler failure");
        }
    }
}

/// Read counters shared between an `InstrumentedStream` and the test.
#[derive(Debug, Default)]
pub struct ReadProbe {
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub completed: AtomicUsize,
}

impl ReadProbe {
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Wait until a read is parked on the stream.
    pub async fn wait_for_pending_read(&self) {
        tokio::time::timeout(TEST_TIMEOUT, async {
            while self.in_flight() == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("no read was issued");
    }

    /// Wait until at least `n` reads have completed.
    pub async fn wait_for_completed(&self, n: usize) {
        tokio::time::timeout(TEST_TIMEOUT, async {
            while self.completed() < n {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("reads did not complete");
    }
}

/// Stream wrapper that tracks how many reads are outstanding.
///
/// A read is outstanding from the first `poll_read` that returns `Pending`
/// until a `poll_read` returns `Ready`.
pub struct InstrumentedStream<S> {
    inner: S,
    probe: Arc<ReadProbe>,
    pending: bool,
}

impl<S> InstrumentedStream<S> {
    pub fn new(inner: S) -> (Self, Arc<ReadProbe>) {
        let probe = Arc::new(ReadProbe::default());
        let stream = Self {
            inner,
            probe: probe.clone(),
            pending: false,
        };
        (stream, probe)
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for InstrumentedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_read(cx, buf);

        match result {
            Poll::Pending if !this.pending => {
                this.pending = true;
                let now = this.probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                this.probe.max_in_flight.fetch_max(now, Ordering::SeqCst);
            }
            Poll::Ready(_) => {
                if this.pending {
                    this.pending = false;
                    this.probe.in_flight.fetch_sub(1, Ordering::SeqCst);
                }
                this.probe.completed.fetch_add(1, Ordering::SeqCst);
            }
            Poll::Pending => {}
        }

        result
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for InstrumentedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Stream double with scripted failures.
///
/// Reads either fail with `read_error` or never complete; writes either
/// fail with `write_error` or succeed immediately.
#[derive(Debug, Default)]
pub struct ScriptedStream {
    pub read_error: Option<io::ErrorKind>,
    pub write_error: Option<io::ErrorKind>,
}

impl ScriptedStream {
    pub fn failing_reads(kind: io::ErrorKind) -> Self {
        Self {
            read_error: Some(kind),
            write_error: None,
        }
    }

    pub fn failing_writes(kind: io::ErrorKind) -> Self {
        Self {
            read_error: None,
            write_error: Some(kind),
        }
    }
}

impl AsyncRead for ScriptedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.read_error {
            Some(kind) => Poll::Ready(Err(io::Error::new(kind, "scripted read failure"))),
            None => Poll::Pending,
        }
    }
}

impl AsyncWrite for ScriptedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.write_error {
            Some(kind) => Poll::Ready(Err(io::Error::new(kind, "scripted write failure"))),
            None => Poll::Ready(Ok(buf.len())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
