//! Prometheus recorder and the metric names the transport records.

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::ServerError;

/// Histogram buckets for durations, in seconds.
///
/// Spans sub-second collaborator calls up to hour-long robot connections.
const DURATION_BUCKETS: &[f64] = &[
    0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0, 3600.0,
];

fn builder() -> Result<PrometheusBuilder, ServerError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Suffix("_seconds".into()), DURATION_BUCKETS)
        .map_err(|e| ServerError::Metrics(e.to_string()))
}

/// Install the Prometheus recorder as the global `metrics` recorder.
///
/// Returns the handle that renders `/metrics`. Fails if a global recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, ServerError> {
    let handle = builder()?
        .install_recorder()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;
    info!(buckets = DURATION_BUCKETS.len(), "prometheus recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket connection duration seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Inbound frames that failed to decode (counter, labels: reason).
pub const WS_INBOUND_ERRORS_TOTAL: &str = "ws_inbound_errors_total";
/// Active robot sessions (gauge).
pub const SESSIONS_ACTIVE: &str = "sessions_active";
/// Session upgrades refused (counter, labels: reason).
pub const SESSIONS_REJECTED_TOTAL: &str = "sessions_rejected_total";
/// Sessions that failed to start (counter).
pub const SESSIONS_FAILED_TOTAL: &str = "sessions_failed_total";
/// Sessions closed (counter, labels: reason).
pub const SESSIONS_CLOSED_TOTAL: &str = "sessions_closed_total";
