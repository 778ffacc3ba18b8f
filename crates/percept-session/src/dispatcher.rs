//! Intention analysis of completed utterances.
//!
//! For each [`DispatchJob`] the dispatcher gathers context (similarity-store
//! snippets and, optionally, a fresh snapshot description) concurrently, then
//! runs the analyzer under the job's utterance scope. Jobs are handled one at
//! a time; the coordinator cancels the previous scope before dispatching the
//! next utterance, so a stale analysis ends instead of holding up the queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, histogram};
use percept_clients::{
    ActionNotifier, ActionRequest, FrameSource, IntentionAnalyzer, VectorStore, VisionClient,
};
use percept_core::{IntentionResult, SessionId};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::channels::{Command, DispatchJob, ScopedIntention};
use crate::mailbox::{Mailbox, MailboxReceiver};
use crate::metrics::{
    ACTIONS_TOTAL, COLLABORATOR_FAILURES_TOTAL, INTENTION_DURATION_SECONDS,
};

/// Snapshot description added to each utterance's context.
pub struct SnapshotContext {
    /// Where the frame comes from.
    pub source: Arc<dyn FrameSource>,
    /// Describes it.
    pub vision: Arc<dyn VisionClient>,
    /// Bound on capture plus description.
    pub timeout: Duration,
}

/// Dispatcher collaborators and limits.
pub struct DispatcherWiring {
    /// Owning session.
    pub session_id: SessionId,
    /// Intention analyzer.
    pub analyzer: Arc<dyn IntentionAnalyzer>,
    /// Optional similarity store for context retrieval.
    pub store: Option<Arc<dyn VectorStore>>,
    /// Optional orchestrator.
    pub notifier: Option<Arc<dyn ActionNotifier>>,
    /// Optional per-utterance snapshot.
    pub snapshot: Option<SnapshotContext>,
    /// Similarity-store namespace of this session.
    pub namespace: String,
    /// Snippets retrieved per utterance.
    pub context_top_k: usize,
    /// Bound on context retrieval.
    pub store_timeout: Duration,
    /// Bound on the analyzer call.
    pub analysis_timeout: Duration,
    /// Results must exceed this confidence to notify the orchestrator.
    pub action_threshold: f64,
    /// Session-lifetime scope.
    pub session: CancellationToken,
}

/// Runs intention analysis for completed utterances.
pub struct IntentionDispatcher {
    wiring: DispatcherWiring,
    jobs: MailboxReceiver<DispatchJob>,
    results: Mailbox<ScopedIntention>,
    commands: Mailbox<Command>,
}

impl IntentionDispatcher {
    /// Build a dispatcher reading `jobs` and delivering to `results`.
    pub fn new(
        wiring: DispatcherWiring,
        jobs: MailboxReceiver<DispatchJob>,
        results: Mailbox<ScopedIntention>,
        commands: Mailbox<Command>,
    ) -> Self {
        Self {
            wiring,
            jobs,
            results,
            commands,
        }
    }

    /// Run until the dispatch mailbox sentinel or session cancellation.
    #[instrument(skip_all, fields(session_id = %self.wiring.session_id))]
    pub async fn run(mut self) {
        let session = self.wiring.session.clone();
        let mut notifications = JoinSet::new();
        loop {
            tokio::select! {
                biased;
                () = session.cancelled() => break,
                job = self.jobs.recv() => match job {
                    Some(job) => self.process(job, &mut notifications).await,
                    None => break,
                },
                Some(joined) = notifications.join_next() => {
                    if let Err(error) = joined {
                        if error.is_panic() {
                            warn!(%error, "orchestrator notification panicked");
                        }
                    }
                }
            }
        }
        notifications.shutdown().await;
        debug!("intention dispatcher stopped");
    }

    #[instrument(skip_all, fields(generation = job.ticket.generation))]
    async fn process(&self, job: DispatchJob, notifications: &mut JoinSet<()>) {
        let DispatchJob { utterance, ticket } = job;
        if ticket.token.is_cancelled() {
            debug!("utterance superseded before analysis");
            return;
        }

        let gathered = tokio::select! {
            biased;
            () = ticket.token.cancelled() => None,
            gathered = async { tokio::join!(self.retrieve_context(&utterance), self.describe_snapshot()) } => Some(gathered),
        };
        let Some((mut context, snapshot)) = gathered else {
            debug!("utterance superseded while gathering context");
            return;
        };
        context.extend(snapshot);

        let started = Instant::now();
        let analyzed = tokio::select! {
            biased;
            () = ticket.token.cancelled() => {
                debug!("utterance superseded during analysis");
                return;
            }
            analyzed = timeout(
                self.wiring.analysis_timeout,
                self.wiring.analyzer.analyze(&utterance, &context),
            ) => analyzed,
        };
        histogram!(INTENTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        let analysis = match analyzed {
            Ok(Ok(analysis)) => analysis,
            Ok(Err(error)) => {
                counter!(COLLABORATOR_FAILURES_TOTAL, "collaborator" => "intention", "category" => error.category()).increment(1);
                warn!(%error, "intention analysis failed");
                return;
            }
            Err(_) => {
                counter!(COLLABORATOR_FAILURES_TOTAL, "collaborator" => "intention", "category" => "timeout").increment(1);
                warn!(timeout = ?self.wiring.analysis_timeout, "intention analysis timed out");
                return;
            }
        };
        if ticket.token.is_cancelled() {
            debug!("discarding result of superseded utterance");
            return;
        }

        let result = IntentionResult::from_analysis(analysis, utterance, context);
        info!(
            has_clear_intention = result.has_clear_intention,
            intention_type = %result.intention_type,
            confidence = result.confidence,
            "intention analysed"
        );
        if result.warrants_action(self.wiring.action_threshold) {
            self.spawn_notification(&result, ticket.token.clone(), notifications);
        }
        let _ = self.results.offer(ScopedIntention {
            generation: ticket.generation,
            result,
        });
    }

    /// Best effort: failures yield no snippets.
    async fn retrieve_context(&self, utterance: &str) -> Vec<String> {
        let Some(store) = &self.wiring.store else {
            return Vec::new();
        };
        let queried = timeout(
            self.wiring.store_timeout,
            store.query(&self.wiring.namespace, utterance, self.wiring.context_top_k),
        )
        .await;
        match queried {
            Ok(Ok(snippets)) => snippets,
            Ok(Err(error)) => {
                counter!(COLLABORATOR_FAILURES_TOTAL, "collaborator" => "vector_store", "category" => error.category()).increment(1);
                warn!(%error, "context retrieval failed, continuing without context");
                Vec::new()
            }
            Err(_) => {
                warn!("context retrieval timed out, continuing without context");
                Vec::new()
            }
        }
    }

    /// Best effort: failures yield no description.
    async fn describe_snapshot(&self) -> Option<String> {
        let snapshot = self.wiring.snapshot.as_ref()?;
        let described = timeout(snapshot.timeout, async {
            let frame = snapshot.source.capture().await?;
            match frame {
                Some(frame) => snapshot.vision.describe(&frame).await.map(Some),
                None => Ok(None),
            }
        })
        .await;
        match described {
            Ok(Ok(Some(scene))) => Some(scene.to_text()).filter(|text| !text.is_empty()),
            Ok(Ok(None)) => None,
            Ok(Err(error)) => {
                warn!(%error, "utterance snapshot failed, continuing without it");
                None
            }
            Err(_) => {
                warn!("utterance snapshot timed out, continuing without it");
                None
            }
        }
    }

    /// Notify the orchestrator unless the utterance is superseded before the
    /// task gets to run.
    fn spawn_notification(
        &self,
        result: &IntentionResult,
        scope: CancellationToken,
        notifications: &mut JoinSet<()>,
    ) {
        let Some(notifier) = self.wiring.notifier.clone() else {
            warn!("orchestrator not configured, skipping action notification");
            return;
        };
        let request = ActionRequest::from_result(&self.wiring.session_id, result);
        let commands = self.commands.clone();
        let _ = notifications.spawn(async move {
            if scope.is_cancelled() {
                counter!(ACTIONS_TOTAL, "outcome" => "superseded").increment(1);
                debug!("utterance superseded, skipping action notification");
                return;
            }
            match notifier.notify(&request).await {
                Ok(()) => {
                    counter!(ACTIONS_TOTAL, "outcome" => "accepted").increment(1);
                    let _ = commands.offer(Command::ActionRecorded { at: Utc::now() });
                }
                Err(error) => {
                    counter!(ACTIONS_TOTAL, "outcome" => "failed").increment(1);
                    warn!(%error, "orchestrator notification failed");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::mailbox;
    use crate::scope::UtteranceScope;
    use crate::test_support::{MockAnalyzer, MockNotifier, MockStore, MockVision};
    use crate::capture::LatestFrame;
    use percept_core::ImageFrame;

    struct Rig {
        jobs: Mailbox<DispatchJob>,
        results: MailboxReceiver<ScopedIntention>,
        commands: MailboxReceiver<Command>,
        session: CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    fn wiring(
        analyzer: Arc<MockAnalyzer>,
        store: Option<Arc<MockStore>>,
        notifier: Arc<MockNotifier>,
        session: &CancellationToken,
    ) -> DispatcherWiring {
        DispatcherWiring {
            session_id: SessionId::from("s1"),
            analyzer,
            store: store.map(|s| s as Arc<dyn VectorStore>),
            notifier: Some(notifier),
            snapshot: None,
            namespace: "perceptus-s1".into(),
            context_top_k: 5,
            store_timeout: Duration::from_secs(10),
            analysis_timeout: Duration::from_secs(30),
            action_threshold: 0.7,
            session: session.clone(),
        }
    }

    fn start(wiring: DispatcherWiring) -> Rig {
        let session = wiring.session.clone();
        let (jobs, jobs_rx) = mailbox("dispatch", 10);
        let (results, results_rx) = mailbox("intention", 10);
        let (commands, commands_rx) = mailbox("commands", 10);
        let dispatcher = IntentionDispatcher::new(wiring, jobs_rx, results, commands);
        Rig {
            jobs,
            results: results_rx,
            commands: commands_rx,
            session,
            task: tokio::spawn(dispatcher.run()),
        }
    }

    #[tokio::test]
    async fn delivers_result_with_context() {
        let session = CancellationToken::new();
        let analyzer = Arc::new(MockAnalyzer::answering(0.9, true));
        let store = Arc::new(MockStore {
            snippets: vec!["Overview: kitchen".into(), "Overview: hall".into()],
            ..MockStore::default()
        });
        let notifier = Arc::new(MockNotifier::default());
        let mut rig = start(wiring(analyzer.clone(), Some(store.clone()), notifier, &session));

        let scope = UtteranceScope::new(&session);
        let _ = rig.jobs.offer(DispatchJob {
            utterance: "get the mug ".into(),
            ticket: scope.ticket(),
        });

        let scoped = rig.results.recv().await.unwrap();
        assert_eq!(scoped.generation, 0);
        assert_eq!(scoped.result.transcript, "get the mug ");
        assert_eq!(scoped.result.environment_context.len(), 2);
        assert_eq!(
            analyzer.calls.lock()[0].1,
            vec!["Overview: kitchen".to_string(), "Overview: hall".to_string()]
        );
        assert_eq!(store.queries.lock()[0], ("perceptus-s1".into(), "get the mug ".into(), 5));

        session.cancel();
        rig.task.await.unwrap();
    }

    #[tokio::test]
    async fn context_failure_is_not_fatal() {
        let session = CancellationToken::new();
        let analyzer = Arc::new(MockAnalyzer::answering(0.2, false));
        let store = Arc::new(MockStore {
            fail_query: true,
            ..MockStore::default()
        });
        let mut rig = start(wiring(analyzer.clone(), Some(store), Arc::new(MockNotifier::default()), &session));

        let scope = UtteranceScope::new(&session);
        let _ = rig.jobs.offer(DispatchJob {
            utterance: "hello".into(),
            ticket: scope.ticket(),
        });
        let scoped = rig.results.recv().await.unwrap();
        assert!(scoped.result.environment_context.is_empty());

        session.cancel();
        rig.task.await.unwrap();
    }

    #[tokio::test]
    async fn below_threshold_does_not_notify() {
        let session = CancellationToken::new();
        let notifier = Arc::new(MockNotifier::default());
        let mut rig = start(wiring(
            Arc::new(MockAnalyzer::answering(0.65, true)),
            None,
            notifier.clone(),
            &session,
        ));

        let scope = UtteranceScope::new(&session);
        let _ = rig.jobs.offer(DispatchJob {
            utterance: "maybe go".into(),
            ticket: scope.ticket(),
        });
        let _ = rig.results.recv().await.unwrap();
        assert!(rig.jobs.seal());
        rig.task.await.unwrap();
        assert_eq!(notifier.count(), 0);
    }

    #[tokio::test]
    async fn above_threshold_notifies_and_records_action() {
        let session = CancellationToken::new();
        let notifier = Arc::new(MockNotifier::default());
        let mut rig = start(wiring(
            Arc::new(MockAnalyzer::answering(0.75, true)),
            None,
            notifier.clone(),
            &session,
        ));

        let scope = UtteranceScope::new(&session);
        let _ = rig.jobs.offer(DispatchJob {
            utterance: "go to the kitchen ".into(),
            ticket: scope.ticket(),
        });
        let _ = rig.results.recv().await.unwrap();
        assert!(matches!(
            rig.commands.recv().await,
            Some(Command::ActionRecorded { .. })
        ));
        assert_eq!(notifier.count(), 1);
        assert_eq!(notifier.requests.lock()[0].transcript, "go to the kitchen ");

        session.cancel();
        rig.task.await.unwrap();
    }

    #[tokio::test]
    async fn unclear_intention_does_not_notify() {
        let session = CancellationToken::new();
        let notifier = Arc::new(MockNotifier::default());
        let mut rig = start(wiring(
            Arc::new(MockAnalyzer::answering(0.95, false)),
            None,
            notifier.clone(),
            &session,
        ));
        let scope = UtteranceScope::new(&session);
        let _ = rig.jobs.offer(DispatchJob {
            utterance: "nice weather".into(),
            ticket: scope.ticket(),
        });
        let _ = rig.results.recv().await.unwrap();
        assert!(rig.jobs.seal());
        rig.task.await.unwrap();
        assert_eq!(notifier.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_analysis_is_discarded() {
        let session = CancellationToken::new();
        let analyzer = Arc::new(MockAnalyzer::answering(0.9, true).with_delay(Duration::from_secs(5)));
        let notifier = Arc::new(MockNotifier::default());
        let mut rig = start(wiring(analyzer.clone(), None, notifier.clone(), &session));

        let mut scope = UtteranceScope::new(&session);
        let a = scope.rotate();
        let _ = rig.jobs.offer(DispatchJob {
            utterance: "first".into(),
            ticket: a,
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(analyzer.call_count(), 1);

        let b = scope.rotate();
        let _ = rig.jobs.offer(DispatchJob {
            utterance: "second".into(),
            ticket: b,
        });

        let scoped = rig.results.recv().await.unwrap();
        assert_eq!(scoped.generation, 2);
        assert_eq!(scoped.result.transcript, "second");
        assert!(matches!(
            rig.commands.recv().await,
            Some(Command::ActionRecorded { .. })
        ));
        assert_eq!(notifier.count(), 1);
        assert_eq!(notifier.requests.lock()[0].transcript, "second");

        session.cancel();
        rig.task.await.unwrap();
    }

    #[tokio::test]
    async fn superseded_scope_skips_pending_notification() {
        let session = CancellationToken::new();
        let notifier = Arc::new(MockNotifier::default());
        let w = wiring(
            Arc::new(MockAnalyzer::answering(0.9, true)),
            None,
            notifier.clone(),
            &session,
        );
        let (_jobs, jobs_rx) = mailbox("dispatch", 1);
        let (results, _results_rx) = mailbox("intention", 1);
        let (commands, _commands_rx) = mailbox("commands", 1);
        let dispatcher = IntentionDispatcher::new(w, jobs_rx, results, commands);

        let mut scope = UtteranceScope::new(&session);
        let ticket = scope.ticket();
        let analysis = percept_core::IntentionAnalysis {
            has_clear_intention: true,
            confidence: 0.9,
            ..percept_core::IntentionAnalysis::default()
        };
        let result = IntentionResult::from_analysis(analysis, "fetch the mug", Vec::new());

        let mut notifications = JoinSet::new();
        dispatcher.spawn_notification(&result, ticket.token.clone(), &mut notifications);
        let _ = scope.rotate();
        while let Some(joined) = notifications.join_next().await {
            joined.unwrap();
        }
        assert_eq!(notifier.count(), 0);

        dispatcher.spawn_notification(&result, scope.ticket().token, &mut notifications);
        while let Some(joined) = notifications.join_next().await {
            joined.unwrap();
        }
        assert_eq!(notifier.count(), 1);
    }

    #[tokio::test]
    async fn cancelled_ticket_skips_analysis() {
        let session = CancellationToken::new();
        let analyzer = Arc::new(MockAnalyzer::answering(0.9, true));
        let rig = start(wiring(analyzer.clone(), None, Arc::new(MockNotifier::default()), &session));

        let mut scope = UtteranceScope::new(&session);
        let stale = scope.ticket();
        let _ = scope.rotate();
        let _ = rig.jobs.offer(DispatchJob {
            utterance: "stale".into(),
            ticket: stale,
        });
        assert!(rig.jobs.seal());
        rig.task.await.unwrap();
        assert_eq!(analyzer.call_count(), 0);
    }

    #[tokio::test]
    async fn snapshot_description_joins_context() {
        let session = CancellationToken::new();
        let analyzer = Arc::new(MockAnalyzer::answering(0.1, false));
        let latest = LatestFrame::default();
        latest.store(ImageFrame::from_base64("Zm9v"));
        let mut w = wiring(analyzer.clone(), None, Arc::new(MockNotifier::default()), &session);
        w.snapshot = Some(SnapshotContext {
            source: Arc::new(latest),
            vision: Arc::new(MockVision::default()),
            timeout: Duration::from_secs(30),
        });
        let mut rig = start(w);

        let scope = UtteranceScope::new(&session);
        let _ = rig.jobs.offer(DispatchJob {
            utterance: "what is here".into(),
            ticket: scope.ticket(),
        });
        let scoped = rig.results.recv().await.unwrap();
        assert_eq!(
            scoped.result.environment_context,
            vec!["Overview: a kitchen\nKey elements: mug on counter".to_string()]
        );

        session.cancel();
        rig.task.await.unwrap();
    }
}
