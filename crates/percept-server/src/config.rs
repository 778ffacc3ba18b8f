//! Server configuration.

use std::time::Duration;

use percept_settings::ServerSettings;

/// Runtime configuration for the perception server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent robot sessions; further upgrades are refused.
    pub max_sessions: usize,
    /// Interval between transport Ping frames.
    pub heartbeat_interval: Duration,
    /// Close the transport after this long without a pong.
    pub heartbeat_timeout: Duration,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Time allowed for open sessions to close on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_sessions: 50,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            max_message_size: 16 * 1024 * 1024, // 16 MB
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            max_sessions: settings.max_sessions,
            heartbeat_interval: Duration::from_secs(settings.heartbeat_interval_secs.max(1)),
            heartbeat_timeout: Duration::from_secs(settings.heartbeat_timeout_secs.max(1)),
            max_message_size: settings.max_message_size,
            shutdown_timeout: Duration::from_secs(settings.shutdown_timeout_secs),
        }
    }
}

impl ServerConfig {
    /// `host:port` to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
