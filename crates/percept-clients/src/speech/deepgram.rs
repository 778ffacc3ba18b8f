//! Deepgram live transcription over WebSocket.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use percept_core::{SessionId, SpeechEvent};
use percept_settings::SpeechSettings;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{AudioSender, SpeechStream, TranscriptFilter, build_listen_url, interpret_message};
use crate::errors::{ClientError, ClientResult};
use crate::traits::SpeechConnector;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_QUEUE: usize = 256;
const KEEPALIVE_FRAME: &str = r#"{"type":"KeepAlive"}"#;
const CLOSE_FRAME: &str = r#"{"type":"CloseStream"}"#;

/// Connects sessions to Deepgram's live transcription API.
pub struct DeepgramConnector {
    settings: SpeechSettings,
    api_key: String,
}

impl DeepgramConnector {
    /// Create a connector.
    pub fn new(settings: SpeechSettings, api_key: impl Into<String>) -> Self {
        Self {
            settings,
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl SpeechConnector for DeepgramConnector {
    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn connect(
        &self,
        session_id: &SessionId,
        cancel: CancellationToken,
    ) -> ClientResult<SpeechStream> {
        let url = build_listen_url(&self.settings)?;
        let mut request = url.as_str().into_client_request()?;
        let auth = HeaderValue::from_str(&format!("Token {}", self.api_key))
            .map_err(|e| ClientError::UnexpectedResponse(format!("invalid API key header: {e}")))?;
        let _ = request.headers_mut().insert(AUTHORIZATION, auth);

        let limit = Duration::from_millis(self.settings.connect_timeout_ms);
        let (socket, _response) = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ClientError::Cancelled),
            handshake = tokio::time::timeout(limit, connect_async(request)) => {
                handshake.map_err(|_| ClientError::Timeout(limit))??
            }
        };
        info!(model = %self.settings.model, "speech stream connected");
        let (sink, stream) = socket.split();

        let (audio_tx, audio_rx) = mpsc::channel(self.settings.audio_queue.max(1));
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);
        let keepalive = Duration::from_secs(self.settings.keepalive_secs.max(1));
        let filter = TranscriptFilter::from(&self.settings);

        drop(tokio::spawn(write_loop(
            sink,
            audio_rx,
            keepalive,
            cancel.clone(),
        )));
        drop(tokio::spawn(read_loop(stream, event_tx, filter, cancel)));

        Ok(SpeechStream {
            audio: AudioSender::new(audio_tx),
            events: event_rx,
        })
    }
}

/// Forward audio as binary frames and keep the stream alive while idle.
async fn write_loop(
    mut sink: SplitSink<Socket, Message>,
    mut audio_rx: mpsc::Receiver<Bytes>,
    keepalive: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(keepalive);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let _ = ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            chunk = audio_rx.recv() => {
                let Some(chunk) = chunk else { break };
                if let Err(error) = sink.send(Message::Binary(chunk)).await {
                    warn!(%error, "speech audio send failed");
                    return;
                }
            }
            _ = ticker.tick() => {
                if sink.send(Message::Text(KEEPALIVE_FRAME.to_owned().into())).await.is_err() {
                    return;
                }
            }
        }
    }

    let _ = sink.send(Message::Text(CLOSE_FRAME.to_owned().into())).await;
    let _ = sink.close().await;
    debug!("speech writer finished");
}

/// Interpret incoming frames until the socket closes or the session is cancelled.
async fn read_loop(
    mut stream: SplitStream<Socket>,
    event_tx: mpsc::Sender<SpeechEvent>,
    filter: TranscriptFilter,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = stream.next() => frame,
        };
        match frame {
            Some(Ok(Message::Text(text))) => {
                for event in interpret_message(text.as_str(), &filter) {
                    if event_tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
            Some(Ok(Message::Close(frame))) => {
                info!(?frame, "speech stream closed by remote");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(error)) => {
                warn!(%error, "speech stream error");
                break;
            }
            None => break,
        }
    }
    debug!("speech reader finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn streams_audio_and_transcripts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let results = serde_json::json!({
                "type": "Results",
                "channel": {"alternatives": [{"transcript": "hello robot", "confidence": 0.95}]},
                "is_final": true,
                "speech_final": true,
            });
            ws.send(Message::Text(results.to_string().into())).await.unwrap();

            loop {
                match ws.next().await {
                    Some(Ok(Message::Binary(data))) => return data,
                    Some(Ok(_)) => {}
                    other => panic!("unexpected frame: {other:?}"),
                }
            }
        });

        let settings = SpeechSettings {
            url: format!("ws://{addr}/v1/listen"),
            ..SpeechSettings::default()
        };
        let connector = DeepgramConnector::new(settings, "test-key");
        let cancel = CancellationToken::new();
        let mut stream = connector
            .connect(&SessionId::new(), cancel.clone())
            .await
            .unwrap();

        assert!(stream.audio.try_send(Bytes::from_static(b"\xff\x7f")));
        let received = server.await.unwrap();
        assert_eq!(&received[..], b"\xff\x7f");

        assert_eq!(
            stream.events.recv().await,
            Some(SpeechEvent::Transcript {
                text: "hello robot".into(),
                confidence: 0.95,
                is_final: true
            })
        );
        assert_eq!(stream.events.recv().await, Some(SpeechEvent::UtteranceEnd));
        cancel.cancel();
    }

    #[tokio::test]
    async fn connect_failure_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let settings = SpeechSettings {
            url: format!("ws://{addr}/v1/listen"),
            ..SpeechSettings::default()
        };
        let connector = DeepgramConnector::new(settings, "test-key");
        let result = connector
            .connect(&SessionId::new(), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ClientError::WebSocket(_))));
    }

    /// Accepts TCP connections and never answers the upgrade.
    async fn silent_endpoint() -> (SpeechSettings, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((tcp, _)) = listener.accept().await {
                held.push(tcp);
            }
        });
        let settings = SpeechSettings {
            url: format!("ws://{addr}/v1/listen"),
            ..SpeechSettings::default()
        };
        (settings, server)
    }

    #[tokio::test]
    async fn stalled_handshake_times_out() {
        let (mut settings, server) = silent_endpoint().await;
        settings.connect_timeout_ms = 200;
        let connector = DeepgramConnector::new(settings, "test-key");

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            connector.connect(&SessionId::new(), CancellationToken::new()),
        )
        .await
        .expect("connect should give up on its own");
        assert!(matches!(result, Err(ClientError::Timeout(limit)) if limit == Duration::from_millis(200)));
        server.abort();
    }

    #[tokio::test]
    async fn stalled_handshake_yields_to_cancellation() {
        let (settings, server) = silent_endpoint().await;
        let connector = DeepgramConnector::new(settings, "test-key");
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        drop(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        }));
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            connector.connect(&SessionId::new(), cancel),
        )
        .await
        .expect("cancellation should end the handshake");
        assert!(matches!(result, Err(ClientError::Cancelled)));
        server.abort();
    }
}
