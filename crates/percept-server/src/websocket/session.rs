//! WebSocket session lifecycle: one robot connection from upgrade through
//! disconnect, bound to one perception session.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use percept_core::{InboundMessage, OutboundMessage, SessionId};
use percept_session::{Lifecycle, SessionCoordinator, SessionHandle, StopReason};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, interval_at, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::connection::ClientConnection;
use super::heartbeat::{HeartbeatPolicy, HeartbeatResult, run_heartbeat};
use crate::metrics::{
    SESSIONS_CLOSED_TOTAL, SESSIONS_FAILED_TOTAL, SESSIONS_REJECTED_TOTAL,
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_INBOUND_ERRORS_TOTAL,
};
use crate::server::AppState;

/// How long the writer may take to flush after the session closed.
const WRITER_DRAIN: Duration = Duration::from_secs(5);

/// Run a robot session over an upgraded socket.
///
/// 1. Starts the session; a failed start closes the socket with an error code,
///    and a drain during start closes it as going away
/// 2. Forwards the session's outbound queue as text frames, with periodic pings
/// 3. Routes inbound text frames as envelopes and binary frames as audio
/// 4. Stops the session on disconnect, heartbeat timeout or server shutdown
#[instrument(skip_all, fields(session_id = %session_id))]
pub async fn run_ws_session(ws: WebSocket, session_id: SessionId, state: AppState) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let shutdown = state.shutdown.token();
    let started = tokio::select! {
        biased;
        () = shutdown.cancelled() => {
            info!("server shutting down during session start");
            close_with(&mut ws_tx, close_code::AWAY, "server shutting down").await;
            return;
        }
        started = SessionCoordinator::start(
            session_id.clone(),
            state.options.as_ref().clone(),
            state.collaborators.clone(),
        ) => started,
    };
    let (handle, outbound) = match started {
        Ok(started) => started,
        Err(error) => {
            counter!(SESSIONS_FAILED_TOTAL).increment(1);
            error!(%error, "session failed to start");
            close_with(&mut ws_tx, close_code::ERROR, "session failed to start").await;
            return;
        }
    };
    if !state.sessions.insert(handle.clone()) {
        counter!(SESSIONS_REJECTED_TOTAL, "reason" => "limit").increment(1);
        warn!("session limit reached, closing");
        handle.stop(StopReason::TransportClosed).await;
        close_with(&mut ws_tx, close_code::AGAIN, "session limit reached").await;
        return;
    }

    let connection = Arc::new(ClientConnection::new(session_id.clone()));
    let _ = state.connections.fetch_add(1, Ordering::Relaxed);
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    info!(connection_id = %connection.id, "robot connected");

    let policy = HeartbeatPolicy {
        interval: state.config.heartbeat_interval,
        timeout: state.config.heartbeat_timeout,
    };
    let connection_scope = CancellationToken::new();
    let writer = tokio::spawn(write_loop(ws_tx, outbound, policy.interval));
    let monitor = tokio::spawn(watch_liveness(
        connection.clone(),
        handle.clone(),
        policy,
        connection_scope.clone(),
    ));

    let mut lifecycle = handle.subscribe();
    loop {
        let frame = tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                handle.stop(StopReason::ServerShutdown).await;
                break;
            }
            () = closed(&mut lifecycle) => break,
            frame = ws_rx.next() => frame,
        };
        match frame {
            Some(Ok(message)) => {
                connection.record_frame();
                if route_frame(&handle, &connection, message).await.is_break() {
                    break;
                }
            }
            Some(Err(error)) => {
                debug!(%error, "websocket read failed");
                break;
            }
            None => break,
        }
    }

    handle.stop(StopReason::TransportClosed).await;
    connection_scope.cancel();
    let _ = monitor.await;
    let abort = writer.abort_handle();
    if timeout(WRITER_DRAIN, writer).await.is_err() {
        warn!("writer did not drain in time");
        abort.abort();
    }

    let _ = state.sessions.remove(&session_id);
    let _ = state.connections.fetch_sub(1, Ordering::Relaxed);
    let reason = handle.stop_reason().unwrap_or(StopReason::TransportClosed);
    counter!(SESSIONS_CLOSED_TOTAL, "reason" => reason.as_str()).increment(1);
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
    info!(
        %reason,
        frames = connection.frames_received(),
        decode_errors = connection.decode_errors(),
        "robot disconnected"
    );
}

/// Resolves once the session reaches `Closed`.
async fn closed(lifecycle: &mut watch::Receiver<Lifecycle>) {
    let _ = lifecycle
        .wait_for(|state| *state == Lifecycle::Closed)
        .await;
}

async fn route_frame(
    handle: &SessionHandle,
    connection: &ClientConnection,
    message: Message,
) -> ControlFlow<()> {
    match message {
        Message::Text(text) => match InboundMessage::parse(text.as_str()) {
            Ok(inbound) => {
                if let Err(error) = handle.handle_inbound(inbound).await {
                    debug!(%error, "dropping inbound message");
                }
            }
            Err(error) => {
                let total = connection.record_decode_error();
                counter!(WS_INBOUND_ERRORS_TOTAL, "reason" => "decode").increment(1);
                warn!(%error, total, "undecodable frame");
            }
        },
        Message::Binary(audio) => handle.handle_audio(audio),
        Message::Ping(_) | Message::Pong(_) => {}
        Message::Close(_) => {
            info!("robot sent close frame");
            return ControlFlow::Break(());
        }
    }
    ControlFlow::Continue(())
}

async fn watch_liveness(
    connection: Arc<ClientConnection>,
    handle: SessionHandle,
    policy: HeartbeatPolicy,
    cancel: CancellationToken,
) {
    if let HeartbeatResult::TimedOut { missed } = run_heartbeat(connection, policy, cancel).await {
        warn!(missed, "robot unresponsive, stopping session");
        handle.stop(StopReason::HeartbeatTimeout).await;
    }
}

/// Forward outbound messages until the session closes the queue, then send
/// a normal close frame.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<OutboundMessage>,
    ping_every: Duration,
) {
    let mut pings = interval_at(Instant::now() + ping_every, ping_every);
    loop {
        tokio::select! {
            biased;
            message = outbound.recv() => match message {
                Some(message) => {
                    let text = message.into_envelope().to_json();
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        return;
                    }
                }
                None => break,
            },
            _ = pings.tick() => {
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    return;
                }
            }
        }
    }
    close_with(&mut sink, close_code::NORMAL, "session closed").await;
}

async fn close_with(sink: &mut SplitSink<WebSocket, Message>, code: u16, reason: &'static str) {
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}
