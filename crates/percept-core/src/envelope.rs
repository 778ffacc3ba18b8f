//! Wire envelope exchanged with the robot client.
//!
//! Every frame is a JSON object `{type, data, timestamp}`. Inbound frames are
//! decoded into [`InboundMessage`]; outbound values are built as
//! [`OutboundMessage`] and wrapped into a [`WsMessage`] just before sending.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::warn;

use crate::duration::{format_duration, parse_duration};
use crate::ids::SessionId;
use crate::types::{EnvironmentContext, IntentionResult};

/// Errors decoding an inbound frame.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The frame is not a JSON envelope.
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
    /// The `data` field has the wrong shape for the message type.
    #[error("invalid data for {kind}: {reason}")]
    InvalidData {
        /// Message type.
        kind: String,
        /// What was wrong.
        reason: String,
    },
}

impl EnvelopeError {
    fn invalid(kind: &str, reason: impl Into<String>) -> Self {
        Self::InvalidData {
            kind: kind.to_owned(),
            reason: reason.into(),
        }
    }
}

/// The `{type, data, timestamp}` frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WsMessage {
    /// Message type tag.
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific payload.
    #[serde(default)]
    pub data: Value,
    /// When the message was produced.
    pub timestamp: DateTime<Utc>,
}

impl WsMessage {
    /// Build a frame stamped with the current time.
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// Serialize to the JSON text sent on the wire.
    pub fn to_json(&self) -> String {
        // A Value-backed struct with a string key map cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Inbound frame as read off the socket; the client's timestamp is ignored.
#[derive(Deserialize)]
struct RawInbound {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// A decoded message from the robot client.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundMessage {
    /// Runtime cadence change. Absent or invalid fields are left unchanged.
    Config {
        /// New snapshot cadence.
        video_frequency: Option<Duration>,
        /// New audio processing cadence.
        audio_frequency: Option<Duration>,
    },
    /// An audio chunk for the speech collaborator.
    AudioData(Vec<u8>),
    /// A base64 still image pushed by the client.
    VideoData(String),
    /// Liveness probe; answered with `pong`.
    Ping,
    /// Client-requested end of session.
    Stop,
    /// A type this server does not handle.
    Unknown(String),
}

impl InboundMessage {
    /// Decode a text frame.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let raw: RawInbound = serde_json::from_str(text)?;
        Self::from_parts(&raw.kind, raw.data)
    }

    fn from_parts(kind: &str, data: Value) -> Result<Self, EnvelopeError> {
        match kind {
            "config" => {
                let Value::Object(map) = data else {
                    return Err(EnvelopeError::invalid(kind, "expected an object"));
                };
                Ok(Self::Config {
                    video_frequency: config_duration(&map, "video_frequency"),
                    audio_frequency: config_duration(&map, "audio_frequency"),
                })
            }
            "audio_data" => {
                let Value::String(encoded) = data else {
                    return Err(EnvelopeError::invalid(kind, "expected a base64 string"));
                };
                STANDARD
                    .decode(encoded.trim())
                    .map(Self::AudioData)
                    .map_err(|e| EnvelopeError::invalid(kind, e.to_string()))
            }
            "video_data" => match data {
                Value::String(image) if !image.trim().is_empty() => Ok(Self::VideoData(image)),
                _ => Err(EnvelopeError::invalid(kind, "expected a non-empty string")),
            },
            "ping" => Ok(Self::Ping),
            "stop" => Ok(Self::Stop),
            other => Ok(Self::Unknown(other.to_owned())),
        }
    }
}

fn config_duration(map: &serde_json::Map<String, Value>, key: &str) -> Option<Duration> {
    let raw = map.get(key)?.as_str()?;
    match parse_duration(raw) {
        Ok(d) if !d.is_zero() => Some(d),
        Ok(_) => {
            warn!(key, value = raw, "zero duration in config, ignoring");
            None
        }
        Err(error) => {
            warn!(key, value = raw, %error, "invalid duration in config, ignoring");
            None
        }
    }
}

/// A message the session sends to the robot client.
#[derive(Clone, Debug, PartialEq)]
pub enum OutboundMessage {
    /// First message after the handshake.
    SessionStarted {
        /// The new session's ID.
        session_id: SessionId,
    },
    /// Echo of the cadences in effect after a `config` message.
    ConfigUpdated {
        /// Snapshot cadence.
        video_frequency: Duration,
        /// Audio processing cadence.
        audio_frequency: Duration,
    },
    /// Echo of a frame the client pushed.
    VideoFrame {
        /// The frame as a `data:` URL.
        image_b64: String,
    },
    /// Analysis of a completed utterance.
    IntentionResult(IntentionResult),
    /// Description of a snapshot.
    VideoAnalysis(EnvironmentContext),
    /// The utterance so far.
    TranscriptInterim {
        /// Trimmed buffer contents.
        transcript: String,
    },
    /// A completed utterance.
    TranscriptFinal {
        /// Full utterance text.
        transcript: String,
    },
    /// Reply to `ping`.
    Pong,
    /// Periodic session status.
    Heartbeat {
        /// Session ID.
        session_id: SessionId,
        /// Seconds since the session started.
        uptime_secs: u64,
        /// Last utterance boundary or interruption.
        last_activity: DateTime<Utc>,
        /// Last successful orchestrator notification, if any.
        last_action: Option<DateTime<Utc>>,
    },
    /// Sent after a client-requested stop has completed.
    StopConfirmation {
        /// Session ID.
        session_id: SessionId,
    },
}

impl OutboundMessage {
    /// Wire `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "session_started",
            Self::ConfigUpdated { .. } => "config_updated",
            Self::VideoFrame { .. } => "video_frame",
            Self::IntentionResult(_) => "intention_result",
            Self::VideoAnalysis(_) => "video_analysis",
            Self::TranscriptInterim { .. } => "transcript_interim",
            Self::TranscriptFinal { .. } => "transcript_final",
            Self::Pong => "pong",
            Self::Heartbeat { .. } => "heartbeat",
            Self::StopConfirmation { .. } => "stop_confirmation",
        }
    }

    /// Wrap into a timestamped envelope.
    pub fn into_envelope(self) -> WsMessage {
        let kind = self.kind();
        let data = match self {
            Self::SessionStarted { session_id } => json!({
                "session_id": session_id,
                "message": "Robot session started successfully",
            }),
            Self::ConfigUpdated {
                video_frequency,
                audio_frequency,
            } => json!({
                "video_frequency": format_duration(video_frequency),
                "audio_frequency": format_duration(audio_frequency),
            }),
            Self::VideoFrame { image_b64 } => json!({ "image_b64": image_b64 }),
            Self::IntentionResult(result) => serde_json::to_value(result).unwrap_or(Value::Null),
            Self::VideoAnalysis(context) => serde_json::to_value(context).unwrap_or(Value::Null),
            Self::TranscriptInterim { transcript } | Self::TranscriptFinal { transcript } => {
                json!({ "transcript": transcript })
            }
            Self::Pong => Value::Null,
            Self::Heartbeat {
                session_id,
                uptime_secs,
                last_activity,
                last_action,
            } => json!({
                "session_id": session_id,
                "uptime_secs": uptime_secs,
                "last_activity": last_activity.to_rfc3339(),
                "last_action": last_action.map(|t| t.to_rfc3339()),
            }),
            Self::StopConfirmation { session_id } => json!({
                "session_id": session_id,
                "message": "Session stopped successfully",
            }),
        };
        WsMessage::new(kind, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parses_config_durations() {
        let msg = InboundMessage::parse(
            r#"{"type":"config","data":{"video_frequency":"5s","audio_frequency":"250ms"}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            InboundMessage::Config {
                video_frequency: Some(Duration::from_secs(5)),
                audio_frequency: Some(Duration::from_millis(250)),
            }
        );
    }

    #[test]
    fn config_ignores_bad_and_zero_fields() {
        let msg = InboundMessage::parse(
            r#"{"type":"config","data":{"video_frequency":"soon","audio_frequency":"0"}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            InboundMessage::Config {
                video_frequency: None,
                audio_frequency: None,
            }
        );
    }

    #[test]
    fn config_requires_object() {
        let err = InboundMessage::parse(r#"{"type":"config","data":"10s"}"#).unwrap_err();
        assert_matches!(err, EnvelopeError::InvalidData { .. });
    }

    #[test]
    fn decodes_audio_base64() {
        let msg = InboundMessage::parse(r#"{"type":"audio_data","data":"AQID"}"#).unwrap();
        assert_eq!(msg, InboundMessage::AudioData(vec![1, 2, 3]));
    }

    #[test]
    fn rejects_bad_audio() {
        assert!(InboundMessage::parse(r#"{"type":"audio_data","data":"***"}"#).is_err());
        assert!(InboundMessage::parse(r#"{"type":"audio_data","data":42}"#).is_err());
    }

    #[test]
    fn parses_simple_commands() {
        assert_eq!(
            InboundMessage::parse(r#"{"type":"ping"}"#).unwrap(),
            InboundMessage::Ping
        );
        assert_eq!(
            InboundMessage::parse(r#"{"type":"stop","timestamp":"2024-01-01T00:00:00Z"}"#)
                .unwrap(),
            InboundMessage::Stop
        );
        assert_eq!(
            InboundMessage::parse(r#"{"type":"dance","data":{}}"#).unwrap(),
            InboundMessage::Unknown("dance".into())
        );
    }

    #[test]
    fn rejects_non_envelope() {
        assert_matches!(InboundMessage::parse("hello"), Err(EnvelopeError::Json(_)));
        assert!(InboundMessage::parse(r#"{"type":"video_data","data":""}"#).is_err());
    }

    #[test]
    fn outbound_envelopes_carry_type_and_data() {
        let env = OutboundMessage::ConfigUpdated {
            video_frequency: Duration::from_secs(10),
            audio_frequency: Duration::from_millis(100),
        }
        .into_envelope();
        assert_eq!(env.kind, "config_updated");
        assert_eq!(env.data["video_frequency"], "10s");
        assert_eq!(env.data["audio_frequency"], "100ms");

        let env = OutboundMessage::TranscriptInterim {
            transcript: "go to the".into(),
        }
        .into_envelope();
        let parsed: Value = serde_json::from_str(&env.to_json()).unwrap();
        assert_eq!(parsed["type"], "transcript_interim");
        assert_eq!(parsed["data"]["transcript"], "go to the");
        assert!(parsed["timestamp"].is_string());
    }

    #[test]
    fn stop_confirmation_names_session() {
        let env = OutboundMessage::StopConfirmation {
            session_id: SessionId::from("s-9"),
        }
        .into_envelope();
        assert_eq!(env.kind, "stop_confirmation");
        assert_eq!(env.data["session_id"], "s-9");
    }
}
