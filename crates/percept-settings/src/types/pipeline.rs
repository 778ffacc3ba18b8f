//! Session pipeline, speech, vision and intention settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How snapshot analysis is triggered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureStrategy {
    /// Analyse every frame the client pushes, as it arrives.
    #[default]
    Push,
    /// Pull a frame from the frame source on a fixed cadence.
    Timer,
}

/// Where the timer strategy gets its frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FrameSourceKind {
    /// The most recent frame the client pushed.
    #[default]
    LatestFrame,
    /// A local camera via ffmpeg.
    Camera,
}

/// Per-session pipeline settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Snapshot trigger strategy.
    pub capture_strategy: CaptureStrategy,
    /// Frame source used by the timer strategy.
    pub frame_source: FrameSourceKind,
    /// Initial snapshot cadence in milliseconds.
    pub capture_interval_ms: u64,
    /// Initial audio processing cadence in milliseconds.
    pub audio_interval_ms: u64,
    /// Transcription mailbox capacity.
    pub transcription_capacity: usize,
    /// Interruption mailbox capacity.
    pub interruption_capacity: usize,
    /// Visual-analysis mailbox capacity.
    pub visual_capacity: usize,
    /// Intention-result mailbox capacity.
    pub intention_capacity: usize,
    /// Coordinator command mailbox capacity.
    pub command_capacity: usize,
    /// Outbound queue towards the transport.
    pub outbound_capacity: usize,
    /// Interval of the `heartbeat` status message, in seconds.
    pub status_interval_secs: u64,
    /// How long `stop` waits for session tasks before aborting them, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            capture_strategy: CaptureStrategy::Push,
            frame_source: FrameSourceKind::LatestFrame,
            capture_interval_ms: 10_000,
            audio_interval_ms: 100,
            transcription_capacity: 100,
            interruption_capacity: 100,
            visual_capacity: 100,
            intention_capacity: 10,
            command_capacity: 64,
            outbound_capacity: 256,
            status_interval_secs: 15,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl SessionSettings {
    /// Initial snapshot cadence.
    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms)
    }

    /// Initial audio cadence.
    pub fn audio_interval(&self) -> Duration {
        Duration::from_millis(self.audio_interval_ms)
    }
}

/// Streaming speech-to-text settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpeechSettings {
    /// Live transcription endpoint.
    pub url: String,
    /// Spoken language code. Non-English languages switch `nova-3` to multilingual mode.
    pub language: String,
    /// Recognition model.
    pub model: String,
    /// Audio encoding of the client's chunks.
    pub encoding: String,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u8,
    /// Silence, in milliseconds, that ends a speech segment.
    pub endpointing_ms: u32,
    /// Ask for interim results.
    pub interim_results: bool,
    /// Keep filler words such as "uh".
    pub filler_words: bool,
    /// Use explicit utterance-end events with this gap instead of `speech_final`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utterance_end_ms: Option<u32>,
    /// Transcripts below this confidence are dropped.
    pub confidence_threshold: f64,
    /// Keep-alive interval in seconds.
    pub keepalive_secs: u64,
    /// Bound on the streaming handshake in milliseconds.
    pub connect_timeout_ms: u64,
    /// Audio chunks buffered before new ones are dropped.
    pub audio_queue: usize,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            url: "wss://api.deepgram.com/v1/listen".to_string(),
            language: "en".to_string(),
            model: "nova-3".to_string(),
            encoding: "mulaw".to_string(),
            sample_rate: 8000,
            channels: 1,
            endpointing_ms: 100,
            interim_results: true,
            filler_words: true,
            utterance_end_ms: None,
            confidence_threshold: 0.3,
            keepalive_secs: 8,
            connect_timeout_ms: 10_000,
            audio_queue: 256,
        }
    }
}

/// Snapshot description settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VisionSettings {
    /// Chat-completions base URL.
    pub base_url: String,
    /// Vision-capable model.
    pub model: String,
    /// Response token cap.
    pub max_tokens: u32,
    /// Per-snapshot timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            max_tokens: 1000,
            timeout_ms: 30_000,
        }
    }
}

/// Intention analysis settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IntentionSettings {
    /// Analyzer model.
    pub model: String,
    /// Per-utterance timeout in milliseconds.
    pub timeout_ms: u64,
    /// Similarity-store snippets retrieved per utterance.
    pub context_top_k: usize,
    /// Results must exceed this confidence to notify the orchestrator.
    pub action_threshold: f64,
    /// Describe one fresh snapshot per utterance and add it to the context.
    pub snapshot_context: bool,
}

impl Default for IntentionSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4.1-2025-04-14".to_string(),
            timeout_ms: 30_000,
            context_top_k: 5,
            action_threshold: 0.7,
            snapshot_context: false,
        }
    }
}
