//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file may specify any subset of fields.

mod pipeline;
mod server;
mod services;

pub use pipeline::*;
pub use server::*;
pub use services::*;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9090 },
///   "session": { "captureStrategy": "timer", "captureIntervalMs": 5000 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PerceptSettings {
    /// HTTP / WebSocket listener.
    pub server: ServerSettings,
    /// Per-session pipeline tuning.
    pub session: SessionSettings,
    /// Streaming speech-to-text.
    pub speech: SpeechSettings,
    /// Snapshot description.
    pub vision: VisionSettings,
    /// Utterance intention analysis.
    pub intention: IntentionSettings,
    /// Similarity store for environment context.
    pub vector_store: VectorStoreSettings,
    /// Downstream orchestrator webhook.
    pub orchestrator: OrchestratorSettings,
    /// Local camera frame source.
    pub camera: CameraSettings,
    /// Log output.
    pub logging: LoggingSettings,
}
