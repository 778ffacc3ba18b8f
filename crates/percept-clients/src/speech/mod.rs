//! Streaming speech-to-text.
//!
//! [`interpret_message`] turns one live-transcription frame into zero or more
//! [`SpeechEvent`]s, applying the emptiness and confidence filters so that
//! downstream consumers only ever see usable text.

mod deepgram;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use percept_core::SpeechEvent;
use percept_settings::SpeechSettings;
use reqwest::Url;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::errors::{ClientError, ClientResult};

pub use deepgram::DeepgramConnector;

/// Non-blocking sink for audio chunks.
#[derive(Clone, Debug)]
pub struct AudioSender {
    tx: mpsc::Sender<Bytes>,
    dropped: Arc<AtomicU64>,
}

impl AudioSender {
    /// Wrap the sending half of the audio queue.
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue a chunk without waiting.
    ///
    /// Returns `false` if the queue is full or closed, and increments the
    /// dropped-chunk counter.
    pub fn try_send(&self, chunk: Bytes) -> bool {
        if self.tx.try_send(chunk).is_ok() {
            true
        } else {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Chunks dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// A connected speech-to-text stream.
#[derive(Debug)]
pub struct SpeechStream {
    /// Where to send audio.
    pub audio: AudioSender,
    /// Filtered recognition events, in arrival order.
    pub events: mpsc::Receiver<SpeechEvent>,
}

impl SpeechStream {
    /// Build a stream from in-process channels.
    ///
    /// Returns the stream plus the far ends: the receiver of audio chunks and
    /// the sender of recognition events.
    pub fn channel(
        audio_capacity: usize,
        event_capacity: usize,
    ) -> (Self, mpsc::Receiver<Bytes>, mpsc::Sender<SpeechEvent>) {
        let (audio_tx, audio_rx) = mpsc::channel(audio_capacity);
        let (event_tx, event_rx) = mpsc::channel(event_capacity);
        (
            Self {
                audio: AudioSender::new(audio_tx),
                events: event_rx,
            },
            audio_rx,
            event_tx,
        )
    }
}

/// Filtering rules applied to recognition frames.
#[derive(Clone, Copy, Debug)]
pub struct TranscriptFilter {
    /// Transcripts strictly below this confidence are discarded.
    pub confidence_threshold: f64,
    /// Utterances end on explicit `UtteranceEnd` frames instead of `speech_final`.
    pub utterance_end_events: bool,
}

impl From<&SpeechSettings> for TranscriptFilter {
    fn from(settings: &SpeechSettings) -> Self {
        Self {
            confidence_threshold: settings.confidence_threshold,
            utterance_end_events: settings.utterance_end_ms.is_some(),
        }
    }
}

#[derive(Deserialize)]
struct ListenFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    channel: Option<ListenChannel>,
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    speech_final: bool,
}

#[derive(Deserialize)]
struct ListenChannel {
    #[serde(default)]
    alternatives: Vec<ListenAlternative>,
}

#[derive(Deserialize)]
struct ListenAlternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    confidence: f64,
}

/// Interpret one text frame from the live-transcription socket.
///
/// - `Results` with an empty or low-confidence top alternative yield nothing.
/// - Otherwise a [`SpeechEvent::Transcript`] is produced, followed by
///   [`SpeechEvent::UtteranceEnd`] when `speech_final` is set and explicit
///   utterance-end frames are not in use.
/// - `UtteranceEnd` frames yield [`SpeechEvent::UtteranceEnd`].
pub fn interpret_message(text: &str, filter: &TranscriptFilter) -> Vec<SpeechEvent> {
    let frame: ListenFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(error) => {
            warn!(%error, "unparseable speech frame");
            return Vec::new();
        }
    };

    match frame.kind.as_str() {
        "Results" => {
            let Some(alternative) = frame
                .channel
                .and_then(|c| c.alternatives.into_iter().next())
            else {
                warn!("speech result without alternatives");
                return Vec::new();
            };
            let transcript = alternative.transcript.trim();
            if transcript.is_empty() {
                return Vec::new();
            }
            if alternative.confidence < filter.confidence_threshold {
                debug!(transcript, confidence = alternative.confidence, "discarding low confidence transcript");
                return Vec::new();
            }

            let mut events = vec![SpeechEvent::Transcript {
                text: transcript.to_owned(),
                confidence: alternative.confidence,
                is_final: frame.is_final,
            }];
            if !filter.utterance_end_events && frame.speech_final {
                events.push(SpeechEvent::UtteranceEnd);
            }
            events
        }
        "UtteranceEnd" => vec![SpeechEvent::UtteranceEnd],
        "Metadata" | "SpeechStarted" => Vec::new(),
        other => {
            debug!(kind = other, "unhandled speech frame");
            Vec::new()
        }
    }
}

/// Build the live-transcription URL with its query options.
pub fn build_listen_url(settings: &SpeechSettings) -> ClientResult<Url> {
    let language = if settings.language != "en" && settings.model == "nova-3" {
        "multi"
    } else {
        settings.language.as_str()
    };
    let mut params = vec![
        ("model", settings.model.clone()),
        ("language", language.to_owned()),
        ("encoding", settings.encoding.clone()),
        ("sample_rate", settings.sample_rate.to_string()),
        ("channels", settings.channels.to_string()),
        ("endpointing", settings.endpointing_ms.to_string()),
        ("interim_results", settings.interim_results.to_string()),
        ("filler_words", settings.filler_words.to_string()),
    ];
    if let Some(ms) = settings.utterance_end_ms {
        params.push(("utterance_end_ms", ms.to_string()));
    }
    Url::parse_with_params(&settings.url, &params)
        .map_err(|e| ClientError::UnexpectedResponse(format!("invalid speech URL: {e}")))
}
