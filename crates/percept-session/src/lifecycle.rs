//! Session lifecycle state.

use std::fmt;

use tokio::sync::watch;

/// Lifecycle of a session. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Lifecycle {
    /// Built, collaborators not yet running.
    Created,
    /// Processing events.
    Active,
    /// Shutdown protocol in progress.
    Stopping,
    /// Every task has exited and the transport was released.
    Closed,
}

impl Lifecycle {
    /// Whether `next` is the immediate successor of `self`.
    pub fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Active)
                | (Self::Active, Self::Stopping)
                | (Self::Stopping, Self::Closed)
        )
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Active => "active",
            Self::Stopping => "stopping",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session stopped. The first recorded reason wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The client sent `stop`.
    ClientRequest,
    /// The connection closed or failed.
    TransportClosed,
    /// The client stopped answering pings.
    HeartbeatTimeout,
    /// The server is shutting down.
    ServerShutdown,
}

impl StopReason {
    /// Snake-case name, used as a metrics label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientRequest => "client_request",
            Self::TransportClosed => "transport_closed",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::ServerShutdown => "server_shutdown",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable lifecycle cell.
#[derive(Debug)]
pub(crate) struct LifecycleCell {
    tx: watch::Sender<Lifecycle>,
}

impl LifecycleCell {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(Lifecycle::Created);
        Self { tx }
    }

    /// Move to `next` if it is the successor of the current state.
    pub(crate) fn advance(&self, next: Lifecycle) -> bool {
        self.tx.send_if_modified(|state| {
            if state.can_advance_to(next) {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn current(&self) -> Lifecycle {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Lifecycle> {
        self.tx.subscribe()
    }
}
