//! Domain values flowing through a perception session.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

/// Marker placed on the transcription mailbox when the speaker finishes an utterance.
pub const END_OF_SPEECH: &str = "<END_OF_SPEECH>";

/// Event emitted by the streaming speech-to-text collaborator.
#[derive(Clone, Debug, PartialEq)]
pub enum SpeechEvent {
    /// A transcript that passed the confidence filter.
    Transcript {
        /// Trimmed transcript text, never empty.
        text: String,
        /// Recognition confidence in `[0, 1]`.
        confidence: f64,
        /// Whether the recognizer will not revise this segment again.
        is_final: bool,
    },
    /// The speaker stopped talking.
    UtteranceEnd,
}

/// Structured answer of the intention analyzer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentionAnalysis {
    /// Whether the utterance asks the robot to do something specific.
    pub has_clear_intention: bool,
    /// Category such as `navigation` or `manipulation`.
    pub intention_type: String,
    /// What the user wants, in the analyzer's words.
    pub description: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Free-text explanation.
    pub reasoning: String,
}

impl Default for IntentionAnalysis {
    fn default() -> Self {
        Self {
            has_clear_intention: false,
            intention_type: "unknown".into(),
            description: String::new(),
            confidence: 0.0,
            reasoning: String::new(),
        }
    }
}

impl IntentionAnalysis {
    /// Analysis used when the analyzer answered with something other than JSON.
    pub fn unparsed(raw: &str) -> Self {
        Self {
            description: raw.trim().to_owned(),
            ..Self::default()
        }
    }
}

/// Outcome of analysing one completed utterance. Immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentionResult {
    /// Whether the utterance carries an actionable request.
    pub has_clear_intention: bool,
    /// Category of the request.
    pub intention_type: String,
    /// Description of the request.
    pub description: String,
    /// Confidence, clamped to `[0, 1]`.
    pub confidence: f64,
    /// Analyzer's explanation.
    pub reasoning: String,
    /// The utterance that was analysed.
    pub transcript: String,
    /// Context snippets that were given to the analyzer, in retrieval order.
    pub environment_context: Vec<String>,
    /// When the result was produced.
    pub timestamp: DateTime<Utc>,
}

impl IntentionResult {
    /// Build a result from an analyzer answer.
    pub fn from_analysis(
        analysis: IntentionAnalysis,
        transcript: impl Into<String>,
        environment_context: Vec<String>,
    ) -> Self {
        let confidence = if analysis.confidence.is_nan() {
            0.0
        } else {
            analysis.confidence.clamp(0.0, 1.0)
        };
        Self {
            has_clear_intention: analysis.has_clear_intention,
            intention_type: analysis.intention_type,
            description: analysis.description,
            confidence,
            reasoning: analysis.reasoning,
            transcript: transcript.into(),
            environment_context,
            timestamp: Utc::now(),
        }
    }

    /// Whether the downstream orchestrator should be told about this result.
    ///
    /// The threshold is exclusive: a confidence equal to it does not qualify.
    pub fn warrants_action(&self, threshold: f64) -> bool {
        self.has_clear_intention && self.confidence > threshold
    }
}

/// Structured description of a snapshot returned by the vision collaborator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneDescription {
    /// One-paragraph summary.
    pub overview: String,
    /// Notable objects with their positions.
    pub key_elements: Vec<String>,
    /// Room type and spatial arrangement.
    pub layout: String,
    /// What people in view are doing.
    pub activities: Vec<String>,
    /// Anything else worth keeping.
    pub additional_info: BTreeMap<String, String>,
}

impl SceneDescription {
    /// Description used when the vision model answered in free text.
    pub fn unparsed(raw: &str) -> Self {
        Self {
            overview: raw.trim().to_owned(),
            ..Self::default()
        }
    }

    /// Render as plain lines suitable for an analyzer prompt.
    pub fn to_text(&self) -> String {
        let mut lines = Vec::new();
        if !self.overview.is_empty() {
            lines.push(format!("Overview: {}", self.overview));
        }
        if !self.key_elements.is_empty() {
            lines.push(format!("Key elements: {}", self.key_elements.join(", ")));
        }
        if !self.layout.is_empty() {
            lines.push(format!("Layout: {}", self.layout));
        }
        if !self.activities.is_empty() {
            lines.push(format!("Activities: {}", self.activities.join(", ")));
        }
        for (key, value) in &self.additional_info {
            lines.push(format!("{key}: {value}"));
        }
        lines.join("\n")
    }
}

/// A described snapshot bound to a session, as stored and sent to the client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentContext {
    /// `<session id>-<unix seconds>`.
    pub id: String,
    /// Owning session.
    pub session_id: SessionId,
    /// When the snapshot was described.
    pub timestamp: DateTime<Utc>,
    /// Scene summary.
    pub overview: String,
    /// Notable objects.
    pub key_elements: Vec<String>,
    /// Spatial arrangement.
    pub layout: String,
    /// Observed activities.
    pub activities: Vec<String>,
    /// Extra key-value observations.
    pub additional_info: BTreeMap<String, String>,
}

impl EnvironmentContext {
    /// Bind a scene description to a session at the given instant.
    pub fn from_scene(session_id: &SessionId, scene: SceneDescription, at: DateTime<Utc>) -> Self {
        Self {
            id: format!("{session_id}-{}", at.timestamp()),
            session_id: session_id.clone(),
            timestamp: at,
            overview: scene.overview,
            key_elements: scene.key_elements,
            layout: scene.layout,
            activities: scene.activities,
            additional_info: scene.additional_info,
        }
    }

    /// Identifier of the similarity-store record for this context.
    pub fn record_id(&self) -> String {
        format!("{}-env", self.id)
    }

    /// Flattened text that gets embedded and later returned as a context snippet.
    pub fn to_text(&self) -> String {
        SceneDescription {
            overview: self.overview.clone(),
            key_elements: self.key_elements.clone(),
            layout: self.layout.clone(),
            activities: self.activities.clone(),
            additional_info: self.additional_info.clone(),
        }
        .to_text()
    }

    /// Metadata stored next to the embedding.
    pub fn metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "text": self.to_text(),
            "overview": self.overview,
            "key_elements": self.key_elements,
            "layout": self.layout,
            "activities": self.activities,
            "additional_info": self.additional_info,
            "session_id": self.session_id,
            "timestamp": self.timestamp.to_rfc3339(),
            "type": "environment_context",
        })
    }
}

/// A still image as a `data:` URL, ready to hand to the vision collaborator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageFrame {
    data_url: String,
    captured_at: DateTime<Utc>,
}

impl ImageFrame {
    const JPEG_PREFIX: &'static str = "data:image/jpeg;base64,";

    /// Wrap a base64 payload pushed by the client.
    ///
    /// Payloads that already carry a `data:image` prefix are kept as-is;
    /// bare payloads are assumed to be JPEG.
    pub fn from_base64(payload: &str) -> Self {
        let payload = payload.trim();
        let data_url = if payload.starts_with("data:image") {
            payload.to_owned()
        } else {
            format!("{}{payload}", Self::JPEG_PREFIX)
        };
        Self {
            data_url,
            captured_at: Utc::now(),
        }
    }

    /// Encode raw JPEG bytes captured locally.
    pub fn from_jpeg_bytes(bytes: &[u8]) -> Self {
        Self {
            data_url: format!("{}{}", Self::JPEG_PREFIX, STANDARD.encode(bytes)),
            captured_at: Utc::now(),
        }
    }

    /// The full `data:` URL.
    pub fn data_url(&self) -> &str {
        &self.data_url
    }

    /// When the frame was received or captured.
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}
