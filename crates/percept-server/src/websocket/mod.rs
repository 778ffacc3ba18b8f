//! Robot session WebSocket: connection state, liveness and the per-connection loop.

pub mod connection;
pub mod heartbeat;
pub mod session;
