//! # percept-server
//!
//! Axum HTTP + `WebSocket` transport for robot perception sessions.
//!
//! - `GET /robot/session`: `WebSocket` upgrade, one perception session per connection
//! - `GET /health`: status, uptime, connection and session counts
//! - `GET /metrics`: Prometheus text format
//! - Heartbeat pings with liveness timeout per connection
//! - Graceful shutdown via `CancellationToken`: sessions are stopped, then tasks drained

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::ServerError;
pub use registry::SessionRegistry;
pub use server::{AppState, PerceptServer};
pub use shutdown::ShutdownCoordinator;
