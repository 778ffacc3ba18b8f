//! Non-blocking queue of messages for the transport.

use std::sync::Arc;

use metrics::counter;
use parking_lot::Mutex;
use percept_core::OutboundMessage;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::metrics::OUTBOUND_DROPS_TOTAL;

/// Sending half of the outbound queue, shared by every session task.
///
/// [`close`](Self::close) releases the transport: the receiver drains what is
/// queued and then ends, and later sends are discarded.
#[derive(Clone, Debug)]
pub struct OutboundSink {
    tx: Arc<Mutex<Option<mpsc::Sender<OutboundMessage>>>>,
}

/// Create an outbound queue of `capacity` messages.
pub fn outbound_channel(capacity: usize) -> (OutboundSink, mpsc::Receiver<OutboundMessage>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        OutboundSink {
            tx: Arc::new(Mutex::new(Some(tx))),
        },
        rx,
    )
}

impl OutboundSink {
    /// Queue `message` without waiting. Returns `false` if it was discarded.
    pub fn send(&self, message: OutboundMessage) -> bool {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            debug!(kind = message.kind(), "outbound closed, discarding message");
            return false;
        };
        match tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                counter!(OUTBOUND_DROPS_TOTAL).increment(1);
                warn!(kind = message.kind(), "outbound queue full, dropping message");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Release the transport.
    pub fn close(&self) {
        drop(self.tx.lock().take());
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }
}
