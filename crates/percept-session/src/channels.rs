//! The session's mailboxes and the values they carry.

use std::time::Duration;

use chrono::{DateTime, Utc};
use percept_core::{ImageFrame, IntentionResult};
use percept_settings::SessionSettings;

use crate::mailbox::{Mailbox, MailboxReceiver, mailbox};
use crate::scope::ScopeTicket;

/// Requests handled by the coordinator loop.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Change cadences; `None` keeps the current value.
    Configure {
        /// Snapshot cadence.
        video_frequency: Option<Duration>,
        /// Audio processing cadence.
        audio_frequency: Option<Duration>,
    },
    /// Answer with `pong`.
    Ping,
    /// The aggregator finished an utterance.
    UtteranceComplete(String),
    /// The orchestrator accepted an action.
    ActionRecorded {
        /// When it was accepted.
        at: DateTime<Utc>,
    },
}

/// A completed utterance handed to the intention dispatcher.
#[derive(Debug)]
pub struct DispatchJob {
    /// Full utterance text.
    pub utterance: String,
    /// Scope the analysis runs under.
    pub ticket: ScopeTicket,
}

/// An intention result tagged with the scope generation that produced it.
#[derive(Clone, Debug)]
pub struct ScopedIntention {
    /// Utterance scope generation.
    pub generation: u64,
    /// The result.
    pub result: IntentionResult,
}

/// Producer halves of every session mailbox.
#[derive(Clone, Debug)]
pub struct EventChannels {
    /// Transcript fragments and the end-of-speech marker.
    pub transcription: Mailbox<String>,
    /// Barge-in signals.
    pub interruption: Mailbox<String>,
    /// Client-pushed frames awaiting analysis.
    pub visual: Mailbox<ImageFrame>,
    /// Intention results on their way to the coordinator.
    pub intention: Mailbox<ScopedIntention>,
    /// Coordinator commands.
    pub commands: Mailbox<Command>,
    /// Utterances on their way to the dispatcher.
    pub dispatch: Mailbox<DispatchJob>,
}

/// Consumer halves, handed out to the task that owns each mailbox.
#[derive(Debug)]
pub struct EventReceivers {
    /// Read by the transcript aggregator.
    pub transcription: MailboxReceiver<String>,
    /// Read by the coordinator.
    pub interruption: MailboxReceiver<String>,
    /// Read by the capture scheduler.
    pub visual: MailboxReceiver<ImageFrame>,
    /// Read by the coordinator.
    pub intention: MailboxReceiver<ScopedIntention>,
    /// Read by the coordinator.
    pub commands: MailboxReceiver<Command>,
    /// Read by the intention dispatcher.
    pub dispatch: MailboxReceiver<DispatchJob>,
}

impl EventChannels {
    /// Create every mailbox with the configured capacities.
    pub fn new(settings: &SessionSettings) -> (Self, EventReceivers) {
        let (transcription, transcription_rx) =
            mailbox("transcription", settings.transcription_capacity);
        let (interruption, interruption_rx) =
            mailbox("interruption", settings.interruption_capacity);
        let (visual, visual_rx) = mailbox("visual", settings.visual_capacity);
        let (intention, intention_rx) = mailbox("intention", settings.intention_capacity);
        let (commands, commands_rx) = mailbox("commands", settings.command_capacity);
        let (dispatch, dispatch_rx) = mailbox("dispatch", settings.intention_capacity);
        (
            Self {
                transcription,
                interruption,
                visual,
                intention,
                commands,
                dispatch,
            },
            EventReceivers {
                transcription: transcription_rx,
                interruption: interruption_rx,
                visual: visual_rx,
                intention: intention_rx,
                commands: commands_rx,
                dispatch: dispatch_rx,
            },
        )
    }

    /// Seal every mailbox and offer the sentinel. Returns how many sentinels were enqueued.
    pub fn seal_all(&self) -> usize {
        [
            self.transcription.seal(),
            self.interruption.seal(),
            self.visual.seal(),
            self.intention.seal(),
            self.commands.seal(),
            self.dispatch.seal(),
        ]
        .into_iter()
        .filter(|enqueued| *enqueued)
        .count()
    }
}
