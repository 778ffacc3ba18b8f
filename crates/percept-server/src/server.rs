//! `PerceptServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use percept_core::SessionId;
use percept_session::{Collaborators, SessionOptions};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::HealthResponse;
use crate::metrics::{self as server_metrics, SESSIONS_REJECTED_TOTAL};
use crate::registry::SessionRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::run_ws_session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live sessions.
    pub sessions: Arc<SessionRegistry>,
    /// Collaborators handed to every new session.
    pub collaborators: Collaborators,
    /// Per-session configuration.
    pub options: Arc<SessionOptions>,
    /// Listener configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Open WebSocket connections.
    pub connections: Arc<AtomicUsize>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle; `None` disables `/metrics`.
    pub metrics: Option<PrometheusHandle>,
}

/// The perception server.
pub struct PerceptServer {
    state: AppState,
}

impl PerceptServer {
    /// Create a new server.
    pub fn new(
        config: ServerConfig,
        options: SessionOptions,
        collaborators: Collaborators,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new(config.shutdown_timeout));
        Self {
            state: AppState {
                sessions: Arc::new(SessionRegistry::new(config.max_sessions)),
                collaborators,
                options: Arc::new(options),
                config: Arc::new(config),
                shutdown,
                connections: Arc::new(AtomicUsize::new(0)),
                start_time: Instant::now(),
                metrics,
            },
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/robot/session", get(session_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve in a background task.
    ///
    /// The listener stops accepting once [`shutdown`](Self::shutdown) is triggered.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = self.state.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        let router = self.router();
        let token = self.state.shutdown.token();

        let handle = tokio::spawn(async move {
            if let Err(error) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(%error, "server stopped with error");
            }
        });
        info!(%local_addr, "perception server listening");
        Ok((local_addr, handle))
    }

    /// Refuse new sessions, stop the open ones and wait for `handles`.
    pub async fn drain(&self, handles: Vec<JoinHandle<()>>) {
        self.state
            .shutdown
            .graceful_shutdown(&self.state.sessions, handles)
            .await;
    }

    /// Live sessions.
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.state.sessions
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }
}

/// GET /robot/session: WebSocket upgrade into a new perception session.
async fn session_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        counter!(SESSIONS_REJECTED_TOTAL, "reason" => "shutdown").increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response();
    }
    if state.sessions.is_full() {
        counter!(SESSIONS_REJECTED_TOTAL, "reason" => "limit").increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "session limit reached").into_response();
    }
    let max_message_size = state.config.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, SessionId::new(), state))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::capture(
        state.start_time,
        state.shutdown.is_shutting_down(),
        state.connections.load(Ordering::Relaxed),
        &state.sessions,
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            server_metrics::render(handle),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}
