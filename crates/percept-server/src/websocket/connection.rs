//! WebSocket client connection state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use percept_core::{ConnectionId, SessionId};

/// Liveness and traffic counters for one robot connection.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Session served over this connection.
    pub session_id: SessionId,
    /// When this connection was established.
    pub connected_at: Instant,
    alive: AtomicBool,
    last_pong: Mutex<Instant>,
    frames_received: AtomicU64,
    decode_errors: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection for `session_id`.
    pub fn new(session_id: SessionId) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            session_id,
            connected_at: now,
            alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            frames_received: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
        }
    }

    /// Record an inbound frame; any traffic counts as liveness.
    pub fn record_frame(&self) {
        let _ = self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.mark_alive();
    }

    /// Record a frame that could not be decoded; returns the running total.
    pub fn record_decode_error(&self) -> u64 {
        self.decode_errors.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Frames received so far.
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Undecodable frames so far.
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong or other traffic received).
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Time since the last sign of life.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag.
    ///
    /// Returns `true` if the client showed signs of life since the last check.
    pub fn check_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
