//! Snapshot scheduling and analysis.
//!
//! The [`CaptureScheduler`] decides when a snapshot is described:
//!
//! - **Timer**: pull a frame from the [`FrameSource`] on a cadence read from a
//!   `watch` channel. A new cadence applies from the next cycle.
//! - **Push**: describe every frame the client pushes into the visual mailbox.
//!
//! Each analysis runs in a task set owned by the scheduler, bound to the
//! session scope, so a slow vision call never delays the next trigger and
//! nothing outlives the scheduler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use parking_lot::RwLock;
use percept_clients::{ClientResult, FrameSource, VectorStore, VisionClient};
use percept_core::{EnvironmentContext, ImageFrame, OutboundMessage, SessionId};
use percept_settings::CaptureStrategy;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::mailbox::MailboxReceiver;
use crate::metrics::{COLLABORATOR_FAILURES_TOTAL, SNAPSHOTS_TOTAL};
use crate::outbound::OutboundSink;

/// Analyses allowed in flight at once; extra triggers are skipped.
const MAX_IN_FLIGHT: usize = 4;

/// The most recent frame pushed by the client.
#[derive(Clone, Debug, Default)]
pub struct LatestFrame {
    frame: Arc<RwLock<Option<ImageFrame>>>,
}

impl LatestFrame {
    /// Replace the stored frame.
    pub fn store(&self, frame: ImageFrame) {
        *self.frame.write() = Some(frame);
    }

    /// The stored frame, if any.
    pub fn get(&self) -> Option<ImageFrame> {
        self.frame.read().clone()
    }
}

#[async_trait]
impl FrameSource for LatestFrame {
    async fn capture(&self) -> ClientResult<Option<ImageFrame>> {
        Ok(self.get())
    }
}

/// Timeouts applied to each snapshot.
#[derive(Clone, Copy, Debug)]
pub struct CaptureTimeouts {
    /// Pulling a frame from the frame source.
    pub capture: Duration,
    /// Describing the frame.
    pub describe: Duration,
    /// Storing the description.
    pub store: Duration,
}

/// Everything one analysis needs; shared by all in-flight analyses.
struct Snapshotter {
    session_id: SessionId,
    source: Arc<dyn FrameSource>,
    vision: Arc<dyn VisionClient>,
    store: Option<Arc<dyn VectorStore>>,
    namespace: String,
    outbound: OutboundSink,
    session: CancellationToken,
    timeouts: CaptureTimeouts,
}

impl Snapshotter {
    async fn pull_frame(&self) -> Option<ImageFrame> {
        let pulled = tokio::select! {
            biased;
            () = self.session.cancelled() => return None,
            pulled = timeout(self.timeouts.capture, self.source.capture()) => pulled,
        };
        match pulled {
            Ok(Ok(Some(frame))) => Some(frame),
            Ok(Ok(None)) => {
                debug!("no frame available yet");
                None
            }
            Ok(Err(error)) => {
                counter!(COLLABORATOR_FAILURES_TOTAL, "collaborator" => "frame_source", "category" => error.category()).increment(1);
                warn!(%error, "frame capture failed");
                None
            }
            Err(_) => {
                warn!(timeout = ?self.timeouts.capture, "frame capture timed out");
                None
            }
        }
    }

    /// Describe one frame, publish it, then store it.
    async fn analyze(self: Arc<Self>, frame: Option<ImageFrame>) {
        let frame = match frame {
            Some(frame) => frame,
            None => match self.pull_frame().await {
                Some(frame) => frame,
                None => return,
            },
        };

        let described = tokio::select! {
            biased;
            () = self.session.cancelled() => return,
            described = timeout(self.timeouts.describe, self.vision.describe(&frame)) => described,
        };
        let scene = match described {
            Ok(Ok(scene)) => scene,
            Ok(Err(error)) => {
                counter!(COLLABORATOR_FAILURES_TOTAL, "collaborator" => "vision", "category" => error.category()).increment(1);
                warn!(%error, "snapshot description failed");
                return;
            }
            Err(_) => {
                counter!(COLLABORATOR_FAILURES_TOTAL, "collaborator" => "vision", "category" => "timeout").increment(1);
                warn!(timeout = ?self.timeouts.describe, "snapshot description timed out");
                return;
            }
        };

        counter!(SNAPSHOTS_TOTAL).increment(1);
        let context = EnvironmentContext::from_scene(&self.session_id, scene, Utc::now());
        debug!(context_id = %context.id, "snapshot described");
        let _ = self
            .outbound
            .send(OutboundMessage::VideoAnalysis(context.clone()));

        let Some(store) = &self.store else { return };
        let stored = timeout(
            self.timeouts.store,
            store.upsert(
                &self.namespace,
                &context.record_id(),
                &context.to_text(),
                context.metadata(),
            ),
        )
        .await;
        match stored {
            Ok(Ok(())) => debug!(record_id = %context.record_id(), "environment context stored"),
            Ok(Err(error)) => {
                counter!(COLLABORATOR_FAILURES_TOTAL, "collaborator" => "vector_store", "category" => error.category()).increment(1);
                warn!(%error, "storing environment context failed");
            }
            Err(_) => warn!(timeout = ?self.timeouts.store, "storing environment context timed out"),
        }
    }
}

/// Triggers snapshot analysis according to the configured strategy.
pub struct CaptureScheduler {
    strategy: CaptureStrategy,
    cadence: watch::Receiver<Duration>,
    frames: MailboxReceiver<ImageFrame>,
    snapshotter: Arc<Snapshotter>,
}

/// Collaborators and wiring for a [`CaptureScheduler`].
pub struct CaptureWiring {
    /// Owning session.
    pub session_id: SessionId,
    /// Trigger strategy.
    pub strategy: CaptureStrategy,
    /// Frame source for the timer strategy.
    pub source: Arc<dyn FrameSource>,
    /// Vision collaborator.
    pub vision: Arc<dyn VisionClient>,
    /// Optional similarity store.
    pub store: Option<Arc<dyn VectorStore>>,
    /// Similarity-store namespace of this session.
    pub namespace: String,
    /// Outbound queue.
    pub outbound: OutboundSink,
    /// Session-lifetime scope.
    pub session: CancellationToken,
    /// Per-snapshot timeouts.
    pub timeouts: CaptureTimeouts,
}

impl CaptureScheduler {
    /// Build a scheduler reading `frames` with the cadence published on `cadence`.
    pub fn new(
        wiring: CaptureWiring,
        cadence: watch::Receiver<Duration>,
        frames: MailboxReceiver<ImageFrame>,
    ) -> Self {
        Self {
            strategy: wiring.strategy,
            cadence,
            frames,
            snapshotter: Arc::new(Snapshotter {
                session_id: wiring.session_id,
                source: wiring.source,
                vision: wiring.vision,
                store: wiring.store,
                namespace: wiring.namespace,
                outbound: wiring.outbound,
                session: wiring.session,
                timeouts: wiring.timeouts,
            }),
        }
    }

    /// Run until the visual mailbox sentinel or session cancellation.
    #[instrument(skip_all, fields(session_id = %self.snapshotter.session_id, strategy = ?self.strategy))]
    pub async fn run(mut self) {
        let mut in_flight = JoinSet::new();
        let session = self.snapshotter.session.clone();
        let mut next_tick = Instant::now() + self.current_cadence();
        info!("capture scheduler started");

        loop {
            match self.strategy {
                CaptureStrategy::Timer => {
                    tokio::select! {
                        biased;
                        () = session.cancelled() => break,
                        frame = self.frames.recv() => {
                            if frame.is_none() {
                                break;
                            }
                        }
                        Some(joined) = in_flight.join_next() => log_join(joined),
                        () = sleep_until(next_tick) => {
                            next_tick = Instant::now() + self.current_cadence();
                            self.trigger(&mut in_flight, None);
                        }
                    }
                }
                CaptureStrategy::Push => {
                    tokio::select! {
                        biased;
                        () = session.cancelled() => break,
                        frame = self.frames.recv() => match frame {
                            Some(frame) => self.trigger(&mut in_flight, Some(frame)),
                            None => break,
                        },
                        Some(joined) = in_flight.join_next() => log_join(joined),
                    }
                }
            }
        }

        in_flight.shutdown().await;
        debug!("capture scheduler stopped");
    }

    fn current_cadence(&mut self) -> Duration {
        let cadence = *self.cadence.borrow_and_update();
        cadence.max(Duration::from_millis(1))
    }

    fn trigger(&self, in_flight: &mut JoinSet<()>, frame: Option<ImageFrame>) {
        if in_flight.len() >= MAX_IN_FLIGHT {
            debug!(in_flight = in_flight.len(), "analysis backlog full, skipping snapshot");
            return;
        }
        let _ = in_flight.spawn(Arc::clone(&self.snapshotter).analyze(frame));
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(error) = joined {
        if error.is_panic() {
            warn!(%error, "snapshot analysis panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::{Mailbox, mailbox};
    use crate::outbound::outbound_channel;
    use crate::test_support::{MockStore, MockVision};
    use tokio::sync::mpsc;

    struct Rig {
        cadence: watch::Sender<Duration>,
        frames: Mailbox<ImageFrame>,
        outbound: mpsc::Receiver<OutboundMessage>,
        session: CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    fn rig(
        strategy: CaptureStrategy,
        source: Arc<dyn FrameSource>,
        vision: Arc<MockVision>,
        store: Option<Arc<MockStore>>,
    ) -> Rig {
        let (cadence_tx, cadence_rx) = watch::channel(Duration::from_secs(10));
        let (frames, frames_rx) = mailbox("visual", 8);
        let (outbound, outbound_rx) = outbound_channel(32);
        let session = CancellationToken::new();
        let wiring = CaptureWiring {
            session_id: SessionId::from("s1"),
            strategy,
            source,
            vision,
            store: store.map(|s| s as Arc<dyn VectorStore>),
            namespace: "perceptus-s1".into(),
            outbound,
            session: session.clone(),
            timeouts: CaptureTimeouts {
                capture: Duration::from_secs(10),
                describe: Duration::from_secs(30),
                store: Duration::from_secs(10),
            },
        };
        let scheduler = CaptureScheduler::new(wiring, cadence_rx, frames_rx);
        Rig {
            cadence: cadence_tx,
            frames,
            outbound: outbound_rx,
            session,
            task: tokio::spawn(scheduler.run()),
        }
    }

    fn latest_with_frame() -> Arc<LatestFrame> {
        let latest = LatestFrame::default();
        latest.store(ImageFrame::from_base64("Zm9v"));
        Arc::new(latest)
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_on_cadence() {
        let vision = Arc::new(MockVision::default());
        let mut rig = rig(CaptureStrategy::Timer, latest_with_frame(), vision.clone(), None);

        tokio::time::sleep(Duration::from_millis(9_900)).await;
        assert_eq!(vision.calls(), 0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(vision.calls(), 1);
        assert!(matches!(
            rig.outbound.recv().await,
            Some(OutboundMessage::VideoAnalysis(_))
        ));

        rig.session.cancel();
        rig.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn new_cadence_applies_next_cycle() {
        let vision = Arc::new(MockVision::default());
        let rig = rig(CaptureStrategy::Timer, latest_with_frame(), vision.clone(), None);

        tokio::time::sleep(Duration::from_millis(10_100)).await;
        assert_eq!(vision.calls(), 1);

        // The tick already scheduled for t=20s keeps its 10s period.
        rig.cadence.send_replace(Duration::from_secs(2));
        tokio::time::sleep(Duration::from_millis(9_000)).await;
        assert_eq!(vision.calls(), 1);
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(vision.calls(), 2);

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(vision.calls(), 3);

        rig.session.cancel();
        rig.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn timer_without_frame_skips_analysis() {
        let vision = Arc::new(MockVision::default());
        let rig = rig(
            CaptureStrategy::Timer,
            Arc::new(LatestFrame::default()),
            vision.clone(),
            None,
        );
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(vision.calls(), 0);
        rig.session.cancel();
        rig.task.await.unwrap();
    }

    #[tokio::test]
    async fn push_describes_and_stores_each_frame() {
        let vision = Arc::new(MockVision::default());
        let store = Arc::new(MockStore::default());
        let mut rig = rig(
            CaptureStrategy::Push,
            Arc::new(LatestFrame::default()),
            vision.clone(),
            Some(store.clone()),
        );

        let _ = rig.frames.offer(ImageFrame::from_base64("YmFy"));
        let Some(OutboundMessage::VideoAnalysis(context)) = rig.outbound.recv().await else {
            panic!("expected video analysis");
        };
        assert_eq!(context.overview, "a kitchen");
        assert!(context.id.starts_with("s1-"));

        assert!(rig.frames.seal());
        rig.task.await.unwrap();

        let upserts = store.upserts.lock().clone();
        assert_eq!(upserts.len(), 1);
        assert_eq!(upserts[0].0, "perceptus-s1");
        assert_eq!(upserts[0].1, format!("{}-env", context.id));
        assert_eq!(
            vision.frames.lock()[0].data_url(),
            "data:image/jpeg;base64,YmFy"
        );
    }

    #[tokio::test]
    async fn vision_failure_sends_nothing() {
        let vision = Arc::new(MockVision {
            fail: true,
            ..MockVision::default()
        });
        let mut rig = rig(
            CaptureStrategy::Push,
            Arc::new(LatestFrame::default()),
            vision.clone(),
            None,
        );
        let _ = rig.frames.offer(ImageFrame::from_base64("YmFy"));
        while vision.calls() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(rig.frames.seal());
        rig.task.await.unwrap();
        assert!(rig.outbound.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_slow_analysis() {
        let vision = Arc::new(MockVision {
            delay: Duration::from_secs(20),
            ..MockVision::default()
        });
        let mut rig = rig(
            CaptureStrategy::Push,
            Arc::new(LatestFrame::default()),
            vision.clone(),
            None,
        );
        let _ = rig.frames.offer(ImageFrame::from_base64("YmFy"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(vision.calls(), 1);

        rig.session.cancel();
        rig.task.await.unwrap();
        assert!(rig.outbound.recv().await.is_none());
    }
}
