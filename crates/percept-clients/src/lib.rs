//! # percept-clients
//!
//! Collaborators of a perception session, each behind an `async_trait` seam:
//!
//! - [`SpeechConnector`]: streaming speech-to-text (Deepgram live API)
//! - [`VisionClient`]: snapshot description (`OpenAI` chat completions with an image)
//! - [`IntentionAnalyzer`]: utterance intention analysis (`OpenAI` chat completions)
//! - [`VectorStore`]: similarity store for environment context (Pinecone + embeddings)
//! - [`ActionNotifier`]: downstream orchestrator webhook
//! - [`FrameSource`]: still frames for timer-driven capture (ffmpeg camera)
//!
//! The session crate only sees the traits; tests substitute in-memory mocks.

#![deny(unsafe_code)]

pub mod camera;
pub mod errors;
pub mod openai;
pub mod orchestrator;
pub mod speech;
pub mod traits;
pub mod vector_store;

pub use camera::{CameraCapture, CaptureBackend};
pub use errors::{ClientError, ClientResult};
pub use openai::{OpenAiClient, build_intention_prompt};
pub use orchestrator::{ActionRequest, WebhookNotifier};
pub use speech::{
    AudioSender, DeepgramConnector, SpeechStream, TranscriptFilter, build_listen_url,
    interpret_message,
};
pub use traits::{
    ActionNotifier, FrameSource, IntentionAnalyzer, SpeechConnector, VectorStore, VisionClient,
};
pub use vector_store::PineconeStore;
