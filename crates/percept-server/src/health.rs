//! `/health` endpoint body.

use std::time::Instant;

use serde::Serialize;

use crate::registry::SessionRegistry;

/// Whether the server is taking new sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Serving and accepting sessions.
    Ok,
    /// Shutdown started; new upgrades are refused.
    Draining,
}

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: ServiceStatus,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open robot connections.
    pub connections: usize,
    /// Sessions in the registry.
    pub active_sessions: usize,
    /// Session limit.
    pub max_sessions: usize,
    /// Whether a new `/robot/session` upgrade would be admitted right now.
    pub accepting: bool,
}

impl HealthResponse {
    /// Snapshot the server's live counters.
    pub fn capture(
        started: Instant,
        draining: bool,
        connections: usize,
        sessions: &SessionRegistry,
    ) -> Self {
        let status = if draining {
            ServiceStatus::Draining
        } else {
            ServiceStatus::Ok
        };
        Self {
            status,
            uptime_secs: started.elapsed().as_secs(),
            connections,
            active_sessions: sessions.len(),
            max_sessions: sessions.max_sessions(),
            accepting: !draining && !sessions.is_full(),
        }
    }
}
