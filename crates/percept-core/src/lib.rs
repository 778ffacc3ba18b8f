//! # percept-core
//!
//! Foundation types shared by every crate of the perception session server.
//!
//! - **Branded IDs**: `SessionId`, `ConnectionId` as newtypes for type safety
//! - **Domain types**: `IntentionResult`, `EnvironmentContext`, `ImageFrame`, `SpeechEvent`
//! - **Wire envelope**: `{type, data, timestamp}` messages exchanged with the robot client
//! - **Durations**: parsing and formatting of `"10s"` / `"250ms"` / `"1m30s"` strings
//! - **Logging**: `tracing` subscriber setup and in-memory capture for tests

#![deny(unsafe_code)]

pub mod duration;
pub mod envelope;
pub mod ids;
pub mod logging;
pub mod types;

pub use duration::{DurationError, format_duration, parse_duration};
pub use envelope::{EnvelopeError, InboundMessage, OutboundMessage, WsMessage};
pub use ids::{ConnectionId, SessionId};
pub use types::{
    END_OF_SPEECH, EnvironmentContext, ImageFrame, IntentionAnalysis, IntentionResult,
    SceneDescription, SpeechEvent,
};
