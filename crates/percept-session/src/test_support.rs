//! In-memory collaborators for session tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use percept_clients::{
    ActionNotifier, ActionRequest, ClientError, ClientResult, IntentionAnalyzer, SpeechConnector,
    SpeechStream, VectorStore, VisionClient,
};
use percept_core::{ImageFrame, IntentionAnalysis, SceneDescription, SessionId, SpeechEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::coordinator::Collaborators;

fn api_failure() -> ClientError {
    ClientError::Api {
        status: 500,
        message: "mock failure".into(),
    }
}

#[derive(Default)]
pub(crate) struct MockSpeech {
    pub fail: bool,
    pub events: Mutex<Option<mpsc::Sender<SpeechEvent>>>,
    pub audio: Mutex<Option<mpsc::Receiver<Bytes>>>,
}

impl MockSpeech {
    pub fn events(&self) -> mpsc::Sender<SpeechEvent> {
        self.events.lock().clone().expect("speech not connected")
    }
}

#[async_trait]
impl SpeechConnector for MockSpeech {
    async fn connect(
        &self,
        _session_id: &SessionId,
        _cancel: CancellationToken,
    ) -> ClientResult<SpeechStream> {
        if self.fail {
            return Err(api_failure());
        }
        let (stream, audio_rx, events_tx) = SpeechStream::channel(4, 64);
        *self.events.lock() = Some(events_tx);
        *self.audio.lock() = Some(audio_rx);
        Ok(stream)
    }
}

#[derive(Default)]
pub(crate) struct MockVision {
    pub calls: AtomicUsize,
    pub fail: bool,
    pub delay: Duration,
    pub frames: Mutex<Vec<ImageFrame>>,
}

impl MockVision {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionClient for MockVision {
    async fn describe(&self, frame: &ImageFrame) -> ClientResult<SceneDescription> {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
        self.frames.lock().push(frame.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(api_failure());
        }
        Ok(SceneDescription {
            overview: "a kitchen".into(),
            key_elements: vec!["mug on counter".into()],
            ..SceneDescription::default()
        })
    }
}

pub(crate) struct MockAnalyzer {
    pub calls: Mutex<Vec<(String, Vec<String>)>>,
    pub response: Mutex<IntentionAnalysis>,
    pub delay: Duration,
    pub fail: bool,
}

impl MockAnalyzer {
    pub fn answering(confidence: f64, clear: bool) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            response: Mutex::new(IntentionAnalysis {
                has_clear_intention: clear,
                intention_type: "navigation".into(),
                description: "go somewhere".into(),
                confidence,
                reasoning: "mock".into(),
            }),
            delay: Duration::ZERO,
            fail: false,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl IntentionAnalyzer for MockAnalyzer {
    async fn analyze(
        &self,
        transcript: &str,
        context: &[String],
    ) -> ClientResult<IntentionAnalysis> {
        self.calls
            .lock()
            .push((transcript.to_owned(), context.to_vec()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(api_failure());
        }
        Ok(self.response.lock().clone())
    }
}

#[derive(Default)]
pub(crate) struct MockStore {
    pub upserts: Mutex<Vec<(String, String, String)>>,
    pub queries: Mutex<Vec<(String, String, usize)>>,
    pub snippets: Vec<String>,
    pub fail_query: bool,
}

#[async_trait]
impl VectorStore for MockStore {
    async fn upsert(
        &self,
        namespace: &str,
        id: &str,
        text: &str,
        _metadata: serde_json::Value,
    ) -> ClientResult<()> {
        self.upserts
            .lock()
            .push((namespace.to_owned(), id.to_owned(), text.to_owned()));
        Ok(())
    }

    async fn query(&self, namespace: &str, text: &str, top_k: usize) -> ClientResult<Vec<String>> {
        self.queries
            .lock()
            .push((namespace.to_owned(), text.to_owned(), top_k));
        if self.fail_query {
            return Err(api_failure());
        }
        Ok(self.snippets.iter().take(top_k).cloned().collect())
    }
}

#[derive(Default)]
pub(crate) struct MockNotifier {
    pub requests: Mutex<Vec<ActionRequest>>,
    pub fail: bool,
}

impl MockNotifier {
    pub fn count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl ActionNotifier for MockNotifier {
    async fn notify(&self, request: &ActionRequest) -> ClientResult<()> {
        self.requests.lock().push(request.clone());
        if self.fail {
            return Err(api_failure());
        }
        Ok(())
    }
}

/// Mocks plus the collaborator bundle built from them.
pub(crate) struct Harness {
    pub speech: Arc<MockSpeech>,
    pub vision: Arc<MockVision>,
    pub analyzer: Arc<MockAnalyzer>,
    pub store: Arc<MockStore>,
    pub notifier: Arc<MockNotifier>,
}

impl Harness {
    pub fn new(analyzer: MockAnalyzer) -> Self {
        Self {
            speech: Arc::new(MockSpeech::default()),
            vision: Arc::new(MockVision::default()),
            analyzer: Arc::new(analyzer),
            store: Arc::new(MockStore::default()),
            notifier: Arc::new(MockNotifier::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            speech: self.speech.clone(),
            vision: self.vision.clone(),
            analyzer: self.analyzer.clone(),
            store: Some(self.store.clone()),
            notifier: Some(self.notifier.clone()),
            camera: None,
        }
    }
}
