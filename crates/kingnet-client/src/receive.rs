//! Receive loop and handler dispatch.
//!
//! The loop owns the read half of the stream and the scratch buffer. Each
//! completed read is copied into a right-sized [`Bytes`] and queued for the
//! dispatcher before the next read is issued, so the handler never sees the
//! scratch buffer and a slow handler never delays reading.
//!
//! There is only ever one read in flight: the loop is a single task that
//! awaits each read before starting the next.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::connection::{BoxedReader, Shared};
use crate::handler::{ConnectionHandler, DisconnectReason};

/// Item passed from the receive loop to the dispatcher.
#[derive(Debug)]
pub(crate) enum Delivery {
    Message(Bytes),
    Disconnected(DisconnectReason),
}

pub(crate) async fn receive_loop(
    mut reader: BoxedReader,
    capacity: usize,
    shared: Arc<Shared>,
    deliveries: mpsc::UnboundedSender<Delivery>,
) {
    let mut scratch = vec![0u8; capacity];

    let reason = loop {
        let read = tokio::select! {
            biased;
            _ = shared.shutdown_requested() => break shared.requested_reason(),
            read = reader.read(&mut scratch) => read,
        };

        match read {
            Ok(0) => {
                debug!("Connection closed by server");
                break DisconnectReason::PeerClosed;
            }
            Ok(n) => {
                let payload = Bytes::copy_from_slice(&scratch[..n]);
                shared.stats.record_received(n);
                trace!(len = n, "Received chunk from server");

                if deliveries.send(Delivery::Message(payload)).is_err() {
                    warn!("Dispatcher stopped, closing connection");
                    break shared.requested_reason();
                }
            }
            Err(e) => {
                warn!("Read failed: {}", e);
                break DisconnectReason::ReadFailed(e.kind());
            }
        }
    };

    drop(reader);
    let reason = shared.teardown(reason).await;

    if deliveries.send(Delivery::Disconnected(reason)).is_err() {
        warn!("Dispatcher stopped before disconnect could be delivered");
        shared.mark_finished();
    }
}

pub(crate) async fn dispatch<H: ConnectionHandler>(
    handler: Arc<H>,
    mut deliveries: mpsc::UnboundedReceiver<Delivery>,
    shared: Arc<Shared>,
) {
    let mut poisoned = false;

    while let Some(delivery) = deliveries.recv().await {
        match delivery {
            Delivery::Message(payload) => {
                if poisoned {
                    trace!(len = payload.len(), "Dropping chunk after handler failure");
                    continue;
                }

                let len = payload.len();
                if catch_unwind(AssertUnwindSafe(|| handler.on_message(payload))).is_err() {
                    error!(len, "Message handler panicked, closing connection");
                    poisoned = true;
                    shared.request_close(DisconnectReason::ConsumerPanicked);
                }
            }
            Delivery::Disconnected(reason) => {
                if catch_unwind(AssertUnwindSafe(|| handler.on_disconnected(reason))).is_err() {
                    error!("Disconnect handler panicked");
                }
                break;
            }
        }
    }

    shared.mark_finished();
}
