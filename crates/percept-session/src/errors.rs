//! Session error types.

use percept_clients::ClientError;
use percept_core::SessionId;

use crate::lifecycle::Lifecycle;

/// Errors surfaced by [`SessionHandle`](crate::SessionHandle) and session start.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The speech collaborator could not be connected; the session never started.
    #[error("speech connection failed: {0}")]
    SpeechConnect(#[source] ClientError),

    /// The session is no longer accepting events.
    #[error("session {session_id} is {state}")]
    NotActive {
        /// Session the event was meant for.
        session_id: SessionId,
        /// State at the time of the call.
        state: Lifecycle,
    },
}
