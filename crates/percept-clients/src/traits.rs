//! Collaborator traits.
//!
//! Every method is a single bounded request; callers own timeouts and
//! cancellation by racing the returned future.

use async_trait::async_trait;
use percept_core::{ImageFrame, IntentionAnalysis, SceneDescription, SessionId};
use tokio_util::sync::CancellationToken;

use crate::errors::ClientResult;
use crate::orchestrator::ActionRequest;
use crate::speech::SpeechStream;

/// Opens a streaming speech-to-text session.
#[async_trait]
pub trait SpeechConnector: Send + Sync {
    /// Connect and return the audio sink plus the filtered event stream.
    ///
    /// The stream ends when `cancel` fires or the remote side closes.
    async fn connect(
        &self,
        session_id: &SessionId,
        cancel: CancellationToken,
    ) -> ClientResult<SpeechStream>;
}

/// Describes still images.
#[async_trait]
pub trait VisionClient: Send + Sync {
    /// Describe the scene in `frame`.
    async fn describe(&self, frame: &ImageFrame) -> ClientResult<SceneDescription>;
}

/// Decides whether an utterance asks the robot to act.
#[async_trait]
pub trait IntentionAnalyzer: Send + Sync {
    /// Analyse `transcript` given ordered context snippets.
    async fn analyze(&self, transcript: &str, context: &[String])
    -> ClientResult<IntentionAnalysis>;
}

/// Similarity store for environment context.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Store `text` under `id`.
    async fn upsert(
        &self,
        namespace: &str,
        id: &str,
        text: &str,
        metadata: serde_json::Value,
    ) -> ClientResult<()>;

    /// Up to `top_k` stored texts most similar to `text`, best first.
    async fn query(&self, namespace: &str, text: &str, top_k: usize) -> ClientResult<Vec<String>>;
}

/// Tells the downstream orchestrator about an actionable intention.
#[async_trait]
pub trait ActionNotifier: Send + Sync {
    /// Deliver `request`; `Ok` only when the orchestrator accepted it.
    async fn notify(&self, request: &ActionRequest) -> ClientResult<()>;
}

/// Supplies still frames on demand.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Capture a frame; `None` when no frame is available yet.
    async fn capture(&self) -> ClientResult<Option<ImageFrame>>;
}
