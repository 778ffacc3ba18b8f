//! Bounded, sealable mailboxes.
//!
//! A [`Mailbox`] is the producer half of a bounded MPSC queue. Producers never
//! wait: [`Mailbox::offer`] either enqueues the value or reports why it did
//! not. Shutdown seals every mailbox and then offers the `SESSION_END`
//! sentinel, so no value can ever sit behind the sentinel. The consumer half,
//! [`MailboxReceiver`], yields `None` once the sentinel is consumed and never
//! reads again.
//!
//! Mailboxes are never explicitly closed; the underlying channel closes only
//! when the last producer is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{trace, warn};

use crate::metrics::MAILBOX_DROPS_TOTAL;

enum Slot<T> {
    Value(T),
    SessionEnd,
}

/// Outcome of [`Mailbox::offer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Offer {
    /// Enqueued.
    Delivered,
    /// The mailbox was full; the value was discarded.
    Dropped,
    /// The mailbox is sealed for shutdown; the value was discarded.
    Sealed,
    /// The consumer is gone; the value was discarded.
    Closed,
}

impl Offer {
    /// Whether the value was enqueued.
    pub fn is_delivered(self) -> bool {
        self == Self::Delivered
    }
}

/// Producer half of a bounded mailbox. Cheap to clone.
pub struct Mailbox<T> {
    name: &'static str,
    tx: mpsc::Sender<Slot<T>>,
    sealed: Arc<RwLock<bool>>,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
            sealed: Arc::clone(&self.sealed),
            dropped: Arc::clone(&self.dropped),
        }
    }
}

impl<T> std::fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("name", &self.name)
            .field("capacity", &self.tx.max_capacity())
            .field("sealed", &self.is_sealed())
            .field("dropped", &self.dropped())
            .finish()
    }
}

/// Create a mailbox holding at most `capacity` values.
///
/// `capacity` is clamped to at least 1.
pub fn mailbox<T>(name: &'static str, capacity: usize) -> (Mailbox<T>, MailboxReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        Mailbox {
            name,
            tx,
            sealed: Arc::new(RwLock::new(false)),
            dropped: Arc::new(AtomicU64::new(0)),
        },
        MailboxReceiver {
            name,
            rx,
            finished: false,
        },
    )
}

impl<T> Mailbox<T> {
    /// Enqueue `value` without waiting.
    pub fn offer(&self, value: T) -> Offer {
        let sealed = self.sealed.read();
        if *sealed {
            trace!(mailbox = self.name, "offer refused, mailbox sealed");
            return Offer::Sealed;
        }
        match self.tx.try_send(Slot::Value(value)) {
            Ok(()) => Offer::Delivered,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                counter!(MAILBOX_DROPS_TOTAL, "mailbox" => self.name).increment(1);
                warn!(mailbox = self.name, dropped, "mailbox full, dropping value");
                Offer::Dropped
            }
            Err(TrySendError::Closed(_)) => Offer::Closed,
        }
    }

    /// Seal the mailbox and offer the sentinel.
    ///
    /// Idempotent. The sentinel is best-effort: when the mailbox is full it is
    /// skipped and the consumer relies on session cancellation instead.
    /// Returns `true` if this call enqueued the sentinel.
    pub fn seal(&self) -> bool {
        let mut sealed = self.sealed.write();
        if *sealed {
            return false;
        }
        *sealed = true;
        match self.tx.try_send(Slot::SessionEnd) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(mailbox = self.name, "mailbox full, sentinel skipped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Whether [`seal`](Self::seal) has been called.
    pub fn is_sealed(&self) -> bool {
        *self.sealed.read()
    }

    /// Values dropped because the mailbox was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Mailbox name, used in logs and metrics.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Consumer half of a mailbox.
pub struct MailboxReceiver<T> {
    name: &'static str,
    rx: mpsc::Receiver<Slot<T>>,
    finished: bool,
}

impl<T> std::fmt::Debug for MailboxReceiver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxReceiver")
            .field("name", &self.name)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<T> MailboxReceiver<T> {
    /// Next value, or `None` once the sentinel was consumed or every producer is gone.
    pub async fn recv(&mut self) -> Option<T> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(Slot::Value(value)) => Some(value),
            Some(Slot::SessionEnd) | None => {
                trace!(mailbox = self.name, "mailbox finished");
                self.finished = true;
                None
            }
        }
    }

    /// Whether this receiver has stopped reading.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
