//! Utterance assembly from transcript fragments.

use metrics::counter;
use percept_core::{END_OF_SPEECH, OutboundMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::channels::Command;
use crate::mailbox::{Mailbox, MailboxReceiver};
use crate::metrics::UTTERANCES_TOTAL;
use crate::outbound::OutboundSink;

/// Effect of pushing one value into a [`TranscriptBuffer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fragment {
    /// Blank text, or an end marker with nothing buffered.
    Ignored,
    /// Text was appended; carries the trimmed buffer.
    Appended(String),
    /// An end marker closed the utterance; carries its full text.
    Completed(String),
}

/// The utterance under construction.
#[derive(Debug, Default)]
pub struct TranscriptBuffer {
    text: String,
}

impl TranscriptBuffer {
    /// Feed one transcript fragment or the end-of-speech marker.
    pub fn push(&mut self, value: &str) -> Fragment {
        if value == END_OF_SPEECH {
            if self.text.is_empty() {
                return Fragment::Ignored;
            }
            return Fragment::Completed(std::mem::take(&mut self.text));
        }
        let fragment = value.trim();
        if fragment.is_empty() {
            return Fragment::Ignored;
        }
        self.text.push_str(fragment);
        self.text.push(' ');
        Fragment::Appended(self.text.trim_end().to_owned())
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Consume the transcription mailbox until the sentinel or session cancellation.
///
/// Interim text goes to the client; completed utterances go to the client and
/// to the coordinator. A partial utterance is dropped on exit.
#[instrument(skip_all, fields(session_id = %session_id))]
pub(crate) async fn run_aggregator(
    session_id: percept_core::SessionId,
    mut transcripts: MailboxReceiver<String>,
    commands: Mailbox<Command>,
    outbound: OutboundSink,
    session: CancellationToken,
) {
    let mut buffer = TranscriptBuffer::default();
    loop {
        let value = tokio::select! {
            biased;
            () = session.cancelled() => break,
            value = transcripts.recv() => value,
        };
        let Some(value) = value else { break };

        match buffer.push(&value) {
            Fragment::Ignored => {}
            Fragment::Appended(transcript) => {
                let _ = outbound.send(OutboundMessage::TranscriptInterim { transcript });
            }
            Fragment::Completed(utterance) => {
                counter!(UTTERANCES_TOTAL).increment(1);
                debug!(len = utterance.len(), "utterance complete");
                let _ = outbound.send(OutboundMessage::TranscriptFinal {
                    transcript: utterance.clone(),
                });
                let _ = commands.offer(Command::UtteranceComplete(utterance));
            }
        }
    }
    if !buffer.is_empty() {
        debug!("discarding partial utterance");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::mailbox;
    use crate::outbound::outbound_channel;
    use percept_core::SessionId;

    #[test]
    fn assembles_utterance() {
        let mut buffer = TranscriptBuffer::default();
        assert_eq!(buffer.push("go to the"), Fragment::Appended("go to the".into()));
        assert_eq!(
            buffer.push("kitchen"),
            Fragment::Appended("go to the kitchen".into())
        );
        assert_eq!(
            buffer.push(END_OF_SPEECH),
            Fragment::Completed("go to the kitchen ".into())
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn blank_fragments_do_not_mutate() {
        let mut buffer = TranscriptBuffer::default();
        assert_eq!(buffer.push("   "), Fragment::Ignored);
        assert_eq!(buffer.push(""), Fragment::Ignored);
        assert!(buffer.is_empty());
        let _ = buffer.push("hi");
        assert_eq!(buffer.push("\t\n"), Fragment::Ignored);
        assert_eq!(buffer.push(END_OF_SPEECH), Fragment::Completed("hi ".into()));
    }

    #[test]
    fn end_marker_on_empty_buffer_is_ignored() {
        let mut buffer = TranscriptBuffer::default();
        assert_eq!(buffer.push(END_OF_SPEECH), Fragment::Ignored);
    }

    #[tokio::test]
    async fn task_emits_interim_final_and_command() {
        let (transcripts, transcripts_rx) = mailbox("transcription", 16);
        let (commands, mut commands_rx) = mailbox("commands", 16);
        let (outbound, mut outbound_rx) = outbound_channel(16);
        let session = CancellationToken::new();
        let task = tokio::spawn(run_aggregator(
            SessionId::from("s1"),
            transcripts_rx,
            commands,
            outbound,
            session.clone(),
        ));

        let _ = transcripts.offer("go to the".to_string());
        let _ = transcripts.offer("  ".to_string());
        let _ = transcripts.offer("kitchen".to_string());
        let _ = transcripts.offer(END_OF_SPEECH.to_string());

        assert_eq!(
            outbound_rx.recv().await,
            Some(OutboundMessage::TranscriptInterim {
                transcript: "go to the".into()
            })
        );
        assert_eq!(
            outbound_rx.recv().await,
            Some(OutboundMessage::TranscriptInterim {
                transcript: "go to the kitchen".into()
            })
        );
        assert_eq!(
            outbound_rx.recv().await,
            Some(OutboundMessage::TranscriptFinal {
                transcript: "go to the kitchen ".into()
            })
        );
        assert_eq!(
            commands_rx.recv().await,
            Some(Command::UtteranceComplete("go to the kitchen ".into()))
        );

        assert!(transcripts.seal());
        task.await.unwrap();
    }

    #[tokio::test]
    async fn sentinel_drops_partial_utterance() {
        let (transcripts, transcripts_rx) = mailbox("transcription", 16);
        let (commands, mut commands_rx) = mailbox::<Command>("commands", 16);
        let (outbound, _outbound_rx) = outbound_channel(16);
        let task = tokio::spawn(run_aggregator(
            SessionId::from("s1"),
            transcripts_rx,
            commands.clone(),
            outbound,
            CancellationToken::new(),
        ));

        let _ = transcripts.offer("half a".to_string());
        assert!(transcripts.seal());
        task.await.unwrap();

        assert!(commands.seal());
        assert_eq!(commands_rx.recv().await, None);
    }
}
