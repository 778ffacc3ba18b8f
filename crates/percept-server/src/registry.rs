//! Live sessions, keyed by session ID.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::gauge;
use percept_core::SessionId;
use percept_session::{SessionHandle, StopReason};
use tracing::debug;

use crate::metrics::SESSIONS_ACTIVE;

/// Counts admitted sessions against the limit.
///
/// Slots are claimed with a compare-and-swap, so concurrent upgrades can
/// never push the count past `max`.
#[derive(Debug)]
struct Admission {
    admitted: AtomicUsize,
    max: usize,
}

impl Admission {
    fn new(max: usize) -> Self {
        Self {
            admitted: AtomicUsize::new(0),
            max,
        }
    }

    fn try_acquire(&self) -> bool {
        self.admitted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max).then_some(n + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        let _ = self
            .admitted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    fn is_full(&self) -> bool {
        self.admitted.load(Ordering::Acquire) >= self.max
    }
}

/// Registry of the sessions this server is running.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionHandle>,
    admission: Admission,
}

impl SessionRegistry {
    /// Create an empty registry admitting at most `max_sessions` sessions.
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            admission: Admission::new(max_sessions),
        }
    }

    /// Whether another session would exceed the limit.
    pub fn is_full(&self) -> bool {
        self.admission.is_full()
    }

    /// Track a started session. Returns `false` if the limit was reached or
    /// the ID is already registered.
    pub fn insert(&self, handle: SessionHandle) -> bool {
        if !self.admission.try_acquire() {
            return false;
        }
        match self.sessions.entry(handle.id().clone()) {
            Entry::Occupied(_) => {
                self.admission.release();
                false
            }
            Entry::Vacant(slot) => {
                let _ = slot.insert(handle);
                gauge!(SESSIONS_ACTIVE).increment(1.0);
                true
            }
        }
    }

    /// Stop tracking a session.
    pub fn remove(&self, id: &SessionId) -> Option<SessionHandle> {
        let removed = self.sessions.remove(id).map(|(_, handle)| handle);
        if removed.is_some() {
            self.admission.release();
            gauge!(SESSIONS_ACTIVE).decrement(1.0);
        }
        removed
    }

    /// Look up a session.
    pub fn get(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Session limit.
    pub fn max_sessions(&self) -> usize {
        self.admission.max
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Stop every registered session concurrently and wait for all of them.
    pub async fn stop_all(&self, reason: StopReason) {
        let handles: Vec<SessionHandle> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        debug!(count = handles.len(), %reason, "stopping all sessions");
        let _ = futures::future::join_all(handles.iter().map(|h| h.stop(reason))).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_stops_at_the_limit() {
        let admission = Admission::new(2);
        assert!(admission.try_acquire());
        assert!(admission.try_acquire());
        assert!(admission.is_full());
        assert!(!admission.try_acquire());

        admission.release();
        assert!(!admission.is_full());
        assert!(admission.try_acquire());
    }

    #[test]
    fn release_never_underflows() {
        let admission = Admission::new(1);
        admission.release();
        assert!(admission.try_acquire());
        assert!(admission.is_full());
    }

    #[test]
    fn concurrent_admissions_respect_the_limit() {
        let admission = Admission::new(3);
        let admitted = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..16 {
                let _ = scope.spawn(|| {
                    if admission.try_acquire() {
                        let _ = admitted.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }
        });
        assert_eq!(admitted.load(Ordering::Relaxed), 3);
        assert!(admission.is_full());
    }

    #[test]
    fn zero_limit_admits_nothing() {
        let registry = SessionRegistry::new(0);
        assert!(registry.is_full());
        assert!(registry.is_empty());
        assert_eq!(registry.max_sessions(), 0);
    }
}
