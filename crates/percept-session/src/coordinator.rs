//! The session coordinator.
//!
//! [`SessionCoordinator::start`] wires the mailboxes, spawns the component
//! tasks and returns a [`SessionHandle`] for the transport plus the outbound
//! queue. The coordinator loop is the single owner of the lifecycle state and
//! the utterance scope; everything else talks to it through mailboxes.
//!
//! ## Shutdown protocol
//!
//! 1. `Active → Stopping`
//! 2. seal every mailbox and offer its sentinel (best-effort)
//! 3. cancel the session scope, which also cancels the utterance scope
//! 4. join the component tasks, aborting stragglers after the shutdown timeout
//! 5. send `stop_confirmation` if the client asked for the stop
//! 6. `Stopping → Closed`, then close the outbound queue

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::Mutex;
use percept_clients::{
    ActionNotifier, AudioSender, FrameSource, IntentionAnalyzer, SpeechConnector, SpeechStream,
    VectorStore, VisionClient,
};
use percept_core::{ImageFrame, InboundMessage, OutboundMessage, SessionId};
use percept_settings::{
    CaptureStrategy, FrameSourceKind, IntentionSettings, PerceptSettings, SessionSettings,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval_at, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::aggregator::run_aggregator;
use crate::capture::{CaptureScheduler, CaptureTimeouts, CaptureWiring, LatestFrame};
use crate::channels::{Command, DispatchJob, EventChannels, EventReceivers, ScopedIntention};
use crate::dispatcher::{DispatcherWiring, IntentionDispatcher, SnapshotContext};
use crate::errors::SessionError;
use crate::lifecycle::{Lifecycle, LifecycleCell, StopReason};
use crate::mailbox::{Mailbox, MailboxReceiver};
use crate::metrics::{INTENTION_RESULTS_STALE_TOTAL, INTENTION_RESULTS_TOTAL};
use crate::outbound::{OutboundSink, outbound_channel};
use crate::scope::UtteranceScope;
use crate::speech_pump::run_speech_pump;

/// Shortest capture cadence a client may configure.
pub const MIN_CAPTURE_INTERVAL: Duration = Duration::from_secs(1);

/// External services a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Streaming speech-to-text.
    pub speech: Arc<dyn SpeechConnector>,
    /// Snapshot description.
    pub vision: Arc<dyn VisionClient>,
    /// Utterance analysis.
    pub analyzer: Arc<dyn IntentionAnalyzer>,
    /// Similarity store; `None` runs without semantic context.
    pub store: Option<Arc<dyn VectorStore>>,
    /// Orchestrator; `None` skips action notifications.
    pub notifier: Option<Arc<dyn ActionNotifier>>,
    /// Local camera for the timer strategy.
    pub camera: Option<Arc<dyn FrameSource>>,
}

/// Per-session configuration.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Mailbox capacities, cadences and capture strategy.
    pub session: SessionSettings,
    /// Analysis limits and the action threshold.
    pub intention: IntentionSettings,
    /// Bound on one snapshot description.
    pub vision_timeout: Duration,
    /// Bound on one similarity-store call.
    pub store_timeout: Duration,
    /// Bound on one camera capture.
    pub capture_timeout: Duration,
    /// Namespace prefix; the session namespace is `<prefix>-<session id>`.
    pub namespace_prefix: String,
}

impl SessionOptions {
    /// Extract the session-relevant parts of the server settings.
    pub fn from_settings(settings: &PerceptSettings) -> Self {
        Self {
            session: settings.session.clone(),
            intention: settings.intention.clone(),
            vision_timeout: Duration::from_millis(settings.vision.timeout_ms),
            store_timeout: Duration::from_millis(settings.vector_store.timeout_ms),
            capture_timeout: Duration::from_millis(settings.camera.timeout_ms),
            namespace_prefix: settings.vector_store.namespace_prefix.clone(),
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_settings(&PerceptSettings::default())
    }
}

/// State shared between the coordinator loop and every [`SessionHandle`].
struct Shared {
    id: SessionId,
    lifecycle: LifecycleCell,
    stop_reason: Mutex<Option<StopReason>>,
    stop_requested: CancellationToken,
    stop_wait: Duration,
    channels: EventChannels,
    audio: AudioSender,
    latest_frame: LatestFrame,
    strategy: CaptureStrategy,
    outbound: OutboundSink,
}

/// Transport-side handle on a running session.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    /// Session ID.
    pub fn id(&self) -> &SessionId {
        &self.shared.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> Lifecycle {
        self.shared.lifecycle.current()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<Lifecycle> {
        self.shared.lifecycle.subscribe()
    }

    /// The recorded stop reason, once a stop has been requested.
    pub fn stop_reason(&self) -> Option<StopReason> {
        *self.shared.stop_reason.lock()
    }

    /// Route one decoded client message.
    ///
    /// Everything except `stop` is a bounded, non-blocking hand-off.
    pub async fn handle_inbound(&self, message: InboundMessage) -> Result<(), SessionError> {
        let state = self.state();
        if state != Lifecycle::Active {
            return Err(SessionError::NotActive {
                session_id: self.shared.id.clone(),
                state,
            });
        }
        match message {
            InboundMessage::AudioData(audio) => self.handle_audio(Bytes::from(audio)),
            InboundMessage::VideoData(image) => self.handle_frame(&image),
            InboundMessage::Config {
                video_frequency,
                audio_frequency,
            } => {
                let _ = self.shared.channels.commands.offer(Command::Configure {
                    video_frequency,
                    audio_frequency,
                });
            }
            InboundMessage::Ping => {
                let _ = self.shared.channels.commands.offer(Command::Ping);
            }
            InboundMessage::Stop => self.stop(StopReason::ClientRequest).await,
            InboundMessage::Unknown(kind) => {
                warn!(session_id = %self.shared.id, %kind, "ignoring unknown message type");
            }
        }
        Ok(())
    }

    /// Forward an audio chunk to the speech collaborator; dropped when its queue is full.
    pub fn handle_audio(&self, chunk: Bytes) {
        if !self.shared.audio.try_send(chunk) {
            debug!(
                session_id = %self.shared.id,
                dropped = self.shared.audio.dropped(),
                "audio queue full, dropping chunk"
            );
        }
    }

    fn handle_frame(&self, image: &str) {
        let frame = ImageFrame::from_base64(image);
        self.shared.latest_frame.store(frame.clone());
        let _ = self.shared.outbound.send(OutboundMessage::VideoFrame {
            image_b64: frame.data_url().to_owned(),
        });
        if self.shared.strategy == CaptureStrategy::Push {
            let _ = self.shared.channels.visual.offer(frame);
        }
    }

    /// Signal a barge-in: the in-flight intention analysis is cancelled.
    pub fn interrupt(&self, text: impl Into<String>) {
        let _ = self.shared.channels.interruption.offer(text.into());
    }

    /// Stop the session and wait until it is `Closed`.
    ///
    /// Idempotent and safe to call concurrently; the first caller's reason is
    /// the one recorded.
    pub async fn stop(&self, reason: StopReason) {
        {
            let mut recorded = self.shared.stop_reason.lock();
            if recorded.is_none() {
                *recorded = Some(reason);
                info!(session_id = %self.shared.id, %reason, "session stop requested");
            }
        }
        self.shared.stop_requested.cancel();

        let mut lifecycle = self.shared.lifecycle.subscribe();
        let closed = timeout(self.shared.stop_wait, async move {
            lifecycle
                .wait_for(|state| *state == Lifecycle::Closed)
                .await
                .is_ok()
        })
        .await;
        if !matches!(closed, Ok(true)) {
            warn!(session_id = %self.shared.id, "session did not reach closed in time");
        }
    }
}

/// The coordinator loop and its owned state.
pub struct SessionCoordinator {
    shared: Arc<Shared>,
    session: CancellationToken,
    scope: UtteranceScope,
    interruptions: MailboxReceiver<String>,
    commands: MailboxReceiver<Command>,
    intentions: MailboxReceiver<ScopedIntention>,
    dispatch: Mailbox<DispatchJob>,
    cadence: watch::Sender<Duration>,
    audio_frequency: Duration,
    started: Instant,
    last_activity: DateTime<Utc>,
    last_action: Option<DateTime<Utc>>,
    status_interval: Duration,
    shutdown_timeout: Duration,
    tasks: JoinSet<()>,
}

impl SessionCoordinator {
    /// Connect speech, spawn the component tasks and the coordinator loop,
    /// and enter `Active`.
    ///
    /// Fails only when the speech collaborator cannot be connected.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub async fn start(
        session_id: SessionId,
        options: SessionOptions,
        collaborators: Collaborators,
    ) -> Result<(SessionHandle, mpsc::Receiver<OutboundMessage>), SessionError> {
        let session = CancellationToken::new();
        let SpeechStream { audio, events } = collaborators
            .speech
            .connect(&session_id, session.clone())
            .await
            .map_err(SessionError::SpeechConnect)?;

        let settings = &options.session;
        let (channels, receivers) = EventChannels::new(settings);
        let EventReceivers {
            transcription,
            interruption,
            visual,
            intention,
            commands,
            dispatch,
        } = receivers;
        let (outbound, outbound_rx) = outbound_channel(settings.outbound_capacity);
        let (cadence_tx, cadence_rx) = watch::channel(settings.capture_interval());
        let latest_frame = LatestFrame::default();
        let namespace = format!("{}-{}", options.namespace_prefix, session_id);
        let shutdown_timeout = Duration::from_millis(settings.shutdown_timeout_ms);

        let mut tasks = JoinSet::new();
        let _ = tasks.spawn(run_speech_pump(
            session_id.clone(),
            events,
            channels.interruption.clone(),
            channels.transcription.clone(),
            session.clone(),
        ));
        let _ = tasks.spawn(run_aggregator(
            session_id.clone(),
            transcription,
            channels.commands.clone(),
            outbound.clone(),
            session.clone(),
        ));

        let source: Arc<dyn FrameSource> = match (&settings.frame_source, &collaborators.camera) {
            (FrameSourceKind::Camera, Some(camera)) => camera.clone(),
            (FrameSourceKind::Camera, None) => {
                warn!("no camera configured, timer captures use the latest pushed frame");
                Arc::new(latest_frame.clone())
            }
            (FrameSourceKind::LatestFrame, _) => Arc::new(latest_frame.clone()),
        };
        let scheduler = CaptureScheduler::new(
            CaptureWiring {
                session_id: session_id.clone(),
                strategy: settings.capture_strategy,
                source: source.clone(),
                vision: collaborators.vision.clone(),
                store: collaborators.store.clone(),
                namespace: namespace.clone(),
                outbound: outbound.clone(),
                session: session.clone(),
                timeouts: CaptureTimeouts {
                    capture: options.capture_timeout,
                    describe: options.vision_timeout,
                    store: options.store_timeout,
                },
            },
            cadence_rx,
            visual,
        );
        let _ = tasks.spawn(scheduler.run());

        let snapshot = options.intention.snapshot_context.then(|| SnapshotContext {
            source,
            vision: collaborators.vision.clone(),
            timeout: options.capture_timeout + options.vision_timeout,
        });
        let dispatcher = IntentionDispatcher::new(
            DispatcherWiring {
                session_id: session_id.clone(),
                analyzer: collaborators.analyzer.clone(),
                store: collaborators.store.clone(),
                notifier: collaborators.notifier.clone(),
                snapshot,
                namespace,
                context_top_k: options.intention.context_top_k,
                store_timeout: options.store_timeout,
                analysis_timeout: Duration::from_millis(options.intention.timeout_ms),
                action_threshold: options.intention.action_threshold,
                session: session.clone(),
            },
            dispatch,
            channels.intention.clone(),
            channels.commands.clone(),
        );
        let _ = tasks.spawn(dispatcher.run());

        let shared = Arc::new(Shared {
            id: session_id.clone(),
            lifecycle: LifecycleCell::new(),
            stop_reason: Mutex::new(None),
            stop_requested: CancellationToken::new(),
            stop_wait: shutdown_timeout * 2,
            channels: channels.clone(),
            audio,
            latest_frame,
            strategy: settings.capture_strategy,
            outbound: outbound.clone(),
        });

        let coordinator = Self {
            shared: shared.clone(),
            scope: UtteranceScope::new(&session),
            session,
            interruptions: interruption,
            commands,
            intentions: intention,
            dispatch: channels.dispatch.clone(),
            cadence: cadence_tx,
            audio_frequency: settings.audio_interval(),
            started: Instant::now(),
            last_activity: Utc::now(),
            last_action: None,
            status_interval: Duration::from_secs(settings.status_interval_secs.max(1)),
            shutdown_timeout,
            tasks,
        };

        let _ = shared.lifecycle.advance(Lifecycle::Active);
        let _ = outbound.send(OutboundMessage::SessionStarted {
            session_id: session_id.clone(),
        });
        drop(tokio::spawn(coordinator.run()));
        info!("session started");

        Ok((SessionHandle { shared }, outbound_rx))
    }

    #[instrument(skip_all, fields(session_id = %self.shared.id))]
    async fn run(mut self) {
        let stop = self.shared.stop_requested.clone();
        let mut status = interval_at(
            tokio::time::Instant::now() + self.status_interval,
            self.status_interval,
        );
        status.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = stop.cancelled() => break,
                Some(text) = self.interruptions.recv() => self.interrupt(&text),
                Some(command) = self.commands.recv() => self.handle_command(command),
                Some(scoped) = self.intentions.recv() => self.deliver(scoped),
                _ = status.tick() => self.send_heartbeat(),
            }
        }
        self.shutdown().await;
    }

    fn interrupt(&mut self, text: &str) {
        let ticket = self.scope.rotate();
        self.last_activity = Utc::now();
        debug!(generation = ticket.generation, len = text.len(), "interruption, utterance scope replaced");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Configure {
                video_frequency,
                audio_frequency,
            } => {
                if let Some(requested) = video_frequency {
                    let cadence = requested.max(MIN_CAPTURE_INTERVAL);
                    if cadence != requested {
                        debug!(?requested, ?cadence, "capture cadence raised to the minimum");
                    }
                    let _ = self.cadence.send_replace(cadence);
                }
                if let Some(cadence) = audio_frequency {
                    self.audio_frequency = cadence;
                }
                let video_frequency = *self.cadence.borrow();
                info!(?video_frequency, audio_frequency = ?self.audio_frequency, "configuration updated");
                let _ = self.shared.outbound.send(OutboundMessage::ConfigUpdated {
                    video_frequency,
                    audio_frequency: self.audio_frequency,
                });
            }
            Command::Ping => {
                let _ = self.shared.outbound.send(OutboundMessage::Pong);
            }
            Command::UtteranceComplete(utterance) => {
                let ticket = self.scope.rotate();
                self.last_activity = Utc::now();
                debug!(generation = ticket.generation, "dispatching utterance");
                let _ = self.dispatch.offer(DispatchJob { utterance, ticket });
            }
            Command::ActionRecorded { at } => self.last_action = Some(at),
        }
    }

    fn deliver(&self, scoped: ScopedIntention) {
        if !self.scope.is_current(scoped.generation) {
            counter!(INTENTION_RESULTS_STALE_TOTAL).increment(1);
            debug!(
                generation = scoped.generation,
                current = self.scope.generation(),
                "discarding stale intention result"
            );
            return;
        }
        counter!(INTENTION_RESULTS_TOTAL).increment(1);
        let _ = self
            .shared
            .outbound
            .send(OutboundMessage::IntentionResult(scoped.result));
    }

    fn send_heartbeat(&self) {
        let _ = self.shared.outbound.send(OutboundMessage::Heartbeat {
            session_id: self.shared.id.clone(),
            uptime_secs: self.started.elapsed().as_secs(),
            last_activity: self.last_activity,
            last_action: self.last_action,
        });
    }

    async fn shutdown(mut self) {
        let reason = (*self.shared.stop_reason.lock()).unwrap_or(StopReason::ServerShutdown);
        let _ = self.shared.lifecycle.advance(Lifecycle::Stopping);

        let sealed = self.shared.channels.seal_all();
        self.session.cancel();

        let tasks = &mut self.tasks;
        let drained = timeout(self.shutdown_timeout, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(error) = joined {
                    if error.is_panic() {
                        warn!(%error, "session task panicked");
                    }
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = self.tasks.len(),
                timeout = ?self.shutdown_timeout,
                "session tasks did not exit in time, aborting"
            );
            self.tasks.shutdown().await;
        }

        if reason == StopReason::ClientRequest {
            let _ = self.shared.outbound.send(OutboundMessage::StopConfirmation {
                session_id: self.shared.id.clone(),
            });
        }
        let _ = self.shared.lifecycle.advance(Lifecycle::Closed);
        self.shared.outbound.close();
        info!(
            %reason,
            sealed,
            uptime_secs = self.started.elapsed().as_secs(),
            "session closed"
        );
    }
}
