//! Fans speech events into the interruption and transcription mailboxes.

use percept_core::{END_OF_SPEECH, SessionId, SpeechEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::mailbox::Mailbox;

/// Every transcript is a barge-in signal; final transcripts and utterance
/// ends also feed the aggregator.
#[instrument(skip_all, fields(session_id = %session_id))]
pub(crate) async fn run_speech_pump(
    session_id: SessionId,
    mut events: mpsc::Receiver<SpeechEvent>,
    interruption: Mailbox<String>,
    transcription: Mailbox<String>,
    session: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = session.cancelled() => return,
            event = events.recv() => event,
        };
        match event {
            Some(SpeechEvent::Transcript { text, is_final, .. }) => {
                if is_final {
                    let _ = interruption.offer(text.clone());
                    let _ = transcription.offer(text);
                } else {
                    let _ = interruption.offer(text);
                }
            }
            Some(SpeechEvent::UtteranceEnd) => {
                let _ = transcription.offer(END_OF_SPEECH.to_owned());
            }
            None => {
                warn!("speech stream ended");
                return;
            }
        }
    }
}
