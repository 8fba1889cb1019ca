//! Deepgram live transcription over WebSocket.
//!
//! Each [`DeepgramTranscriptionStream`] owns a background task that forwards audio frames,
//! keeps the socket alive and turns provider messages into [`StreamEvent`]s.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http::{HeaderValue, StatusCode, header::AUTHORIZATION};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message, client::IntoClientRequest};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use super::base::{
    StreamEvent, StreamEventCallback, TranscriptEvent, TranscriptionError, TranscriptionOptions,
    TranscriptionProvider, TranscriptionStream, WordTiming,
};
use crate::core::recovery::FailureKind;
use crate::core::relay::{AudioSink, SinkError};

pub const DEEPGRAM_LISTEN_URL: &str = "wss://api.deepgram.com/v1/listen";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);
const KEEPALIVE_MESSAGE: &str = r#"{"type":"KeepAlive"}"#;
const CLOSE_STREAM_MESSAGE: &str = r#"{"type":"CloseStream"}"#;

/// Listen parameters shared by every stream
#[derive(Debug, Clone)]
pub struct DeepgramSTTConfig {
    pub api_key: Option<String>,
    pub url: String,
    pub model: String,
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub interim_results: bool,
    /// Silence in milliseconds before Deepgram finalizes a segment
    pub endpointing: Option<u32>,
    pub utterance_end_ms: Option<u32>,
    pub smart_format: bool,
    pub punctuate: bool,
    pub diarize: bool,
    pub filler_words: bool,
}

impl Default for DeepgramSTTConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            url: DEEPGRAM_LISTEN_URL.to_string(),
            model: "nova-2".to_string(),
            encoding: "linear16".to_string(),
            sample_rate: 16000,
            channels: 1,
            interim_results: true,
            endpointing: Some(300),
            utterance_end_ms: Some(1000),
            smart_format: true,
            punctuate: true,
            diarize: true,
            filler_words: true,
        }
    }
}

impl DeepgramSTTConfig {
    pub fn build_url(&self, options: &TranscriptionOptions) -> Result<Url, TranscriptionError> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| TranscriptionError::Configuration(format!("Invalid listen URL: {e}")))?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("model", &self.model);
            query.append_pair("language", &options.language);
            query.append_pair("encoding", &self.encoding);
            query.append_pair("sample_rate", &self.sample_rate.to_string());
            query.append_pair("channels", &self.channels.to_string());
            query.append_pair("interim_results", &self.interim_results.to_string());
            if let Some(endpointing) = self.endpointing {
                query.append_pair("endpointing", &endpointing.to_string());
            }
            if let Some(utterance_end_ms) = self.utterance_end_ms {
                query.append_pair("utterance_end_ms", &utterance_end_ms.to_string());
            }
            query.append_pair("smart_format", &self.smart_format.to_string());
            query.append_pair("punctuate", &self.punctuate.to_string());
            query.append_pair("diarize", &self.diarize.to_string());
            query.append_pair("filler_words", &self.filler_words.to_string());
        }

        Ok(url)
    }
}

#[derive(Debug, Deserialize)]
struct DeepgramMessage {
    #[serde(rename = "type")]
    message_type: String,
    channel: Option<DeepgramChannel>,
    is_final: Option<bool>,
    #[serde(default)]
    sentiments: Option<serde_json::Value>,
    #[serde(default)]
    topics: Option<serde_json::Value>,
    description: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Debug, Deserialize)]
struct DeepgramAlternative {
    transcript: String,
    confidence: f32,
    #[serde(default)]
    words: Vec<DeepgramWord>,
}

#[derive(Debug, Deserialize)]
pub(super) struct DeepgramWord {
    word: String,
    start: f64,
    end: f64,
    confidence: f32,
    punctuated_word: Option<String>,
    speaker: Option<u32>,
}

impl From<DeepgramWord> for WordTiming {
    fn from(word: DeepgramWord) -> Self {
        WordTiming {
            word: word.word,
            start: word.start,
            end: word.end,
            confidence: word.confidence,
            punctuated_word: word.punctuated_word,
            speaker: word.speaker,
        }
    }
}

/// Turn one text frame from Deepgram into a stream event.
///
/// Returns `Ok(None)` for messages the session does not care about.
pub fn parse_message(text: &str) -> Result<Option<StreamEvent>, TranscriptionError> {
    let message: DeepgramMessage = serde_json::from_str(text)
        .map_err(|e| TranscriptionError::Provider(format!("Unparseable message: {e}")))?;

    match message.message_type.as_str() {
        "Results" => {
            let Some(alternative) = message
                .channel
                .and_then(|c| c.alternatives.into_iter().next())
            else {
                return Ok(None);
            };

            let mut event = TranscriptEvent::new(
                alternative.transcript,
                message.is_final.unwrap_or(false),
                alternative.confidence,
            )
            .with_words(alternative.words.into_iter().map(WordTiming::from).collect());

            let mut annotations = serde_json::Map::new();
            if let Some(sentiments) = message.sentiments {
                annotations.insert("sentiment".to_string(), sentiments);
            }
            if let Some(topics) = message.topics {
                annotations.insert("topics".to_string(), topics);
            }
            if !annotations.is_empty() {
                event = event.with_annotations(serde_json::Value::Object(annotations));
            }

            Ok(Some(StreamEvent::Transcript(event)))
        }
        "Metadata" => {
            let value: serde_json::Value = serde_json::from_str(text)
                .map_err(|e| TranscriptionError::Provider(e.to_string()))?;
            let mut fields = match value {
                serde_json::Value::Object(map) => map,
                _ => serde_json::Map::new(),
            };
            fields.remove("type");
            Ok(Some(StreamEvent::Metadata(fields)))
        }
        "UtteranceEnd" => Ok(Some(StreamEvent::UtteranceEnd)),
        "SpeechStarted" => Ok(None),
        "Error" => {
            let detail = message
                .description
                .or(message.message)
                .unwrap_or_else(|| "unknown provider error".to_string());
            Ok(Some(StreamEvent::Error(TranscriptionError::Provider(detail))))
        }
        other => {
            debug!(message_type = other, "Ignoring Deepgram message");
            Ok(None)
        }
    }
}

/// Map a tungstenite error to a classified transcription error
pub fn classify_ws_error(error: &tungstenite::Error) -> TranscriptionError {
    match error {
        tungstenite::Error::Io(io) => {
            TranscriptionError::from_kind(FailureKind::from_io(io), io.to_string())
        }
        tungstenite::Error::Http(response) => {
            let status = response.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                TranscriptionError::Authentication(format!("Deepgram rejected credentials ({status})"))
            } else if status.is_server_error() {
                TranscriptionError::Network(format!("Deepgram unavailable ({status})"))
            } else {
                TranscriptionError::Provider(format!("Deepgram handshake failed ({status})"))
            }
        }
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TranscriptionError::Stream(error.to_string())
        }
        tungstenite::Error::Protocol(_) => TranscriptionError::Stream(error.to_string()),
        tungstenite::Error::Url(_) => TranscriptionError::Configuration(error.to_string()),
        _ => TranscriptionError::Network(error.to_string()),
    }
}

/// Opens Deepgram live streams
#[derive(Debug, Clone, Default)]
pub struct DeepgramTranscriptionProvider {
    config: DeepgramSTTConfig,
}

impl DeepgramTranscriptionProvider {
    pub fn new(config: DeepgramSTTConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DeepgramSTTConfig {
        &self.config
    }
}

#[async_trait]
impl TranscriptionProvider for DeepgramTranscriptionProvider {
    async fn open_stream(
        &self,
        options: &TranscriptionOptions,
        on_event: StreamEventCallback,
    ) -> Result<Arc<dyn TranscriptionStream>, TranscriptionError> {
        let api_key = self.config.api_key.as_deref().ok_or_else(|| {
            TranscriptionError::Configuration("DEEPGRAM_API_KEY is not configured".to_string())
        })?;

        let url = self.config.build_url(options)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| classify_ws_error(&e))?;
        let auth = HeaderValue::from_str(&format!("Token {api_key}"))
            .map_err(|e| TranscriptionError::Configuration(format!("Invalid API key: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        let (socket, _) = timeout(CONNECT_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| TranscriptionError::Timeout("Deepgram connect timed out".to_string()))?
            .map_err(|e| classify_ws_error(&e))?;

        info!(language = %options.language, model = %self.config.model, "Connected to Deepgram");

        Ok(Arc::new(DeepgramTranscriptionStream::spawn(socket, on_event)))
    }

    fn name(&self) -> &'static str {
        "deepgram"
    }
}

type DeepgramSocket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub struct DeepgramTranscriptionStream {
    sender: mpsc::UnboundedSender<Message>,
    shutdown: CancellationToken,
}

impl DeepgramTranscriptionStream {
    fn spawn(socket: DeepgramSocket, on_event: StreamEventCallback) -> Self {
        let (sender, outgoing) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        tokio::spawn(run_connection(socket, outgoing, shutdown.clone(), on_event));
        Self { sender, shutdown }
    }
}

async fn run_connection(
    socket: DeepgramSocket,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
    shutdown: CancellationToken,
    on_event: StreamEventCallback,
) {
    let (mut sink, mut stream) = socket.split();
    let mut keepalive = interval_at(Instant::now() + KEEPALIVE_INTERVAL, KEEPALIVE_INTERVAL);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = sink.send(Message::Text(CLOSE_STREAM_MESSAGE.into())).await;
                let _ = sink.close().await;
                debug!("Deepgram stream finished");
                break;
            }
            Some(message) = outgoing.recv() => {
                if let Err(e) = sink.send(message).await {
                    error!(error = %e, "Failed to send audio to Deepgram");
                    on_event(StreamEvent::Error(classify_ws_error(&e))).await;
                    break;
                }
            }
            _ = keepalive.tick() => {
                if let Err(e) = sink.send(Message::Text(KEEPALIVE_MESSAGE.into())).await {
                    warn!(error = %e, "Failed to send Deepgram keepalive");
                    on_event(StreamEvent::Error(classify_ws_error(&e))).await;
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => match parse_message(&text) {
                    Ok(Some(event)) => on_event(event).await,
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Dropping malformed Deepgram message"),
                },
                Some(Ok(Message::Close(frame))) => {
                    if shutdown.is_cancelled() {
                        break;
                    }
                    warn!(?frame, "Deepgram closed the stream");
                    on_event(StreamEvent::Closed).await;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    if shutdown.is_cancelled() {
                        break;
                    }
                    error!(error = %e, "Deepgram stream error");
                    on_event(StreamEvent::Error(classify_ws_error(&e))).await;
                    break;
                }
                None => {
                    if !shutdown.is_cancelled() {
                        on_event(StreamEvent::Closed).await;
                    }
                    break;
                }
            }
        }
    }

    shutdown.cancel();
}

#[async_trait]
impl AudioSink for DeepgramTranscriptionStream {
    async fn send_chunk(&self, chunk: Bytes) -> Result<(), SinkError> {
        self.send(chunk).await.map_err(Into::into)
    }
}

#[async_trait]
impl TranscriptionStream for DeepgramTranscriptionStream {
    async fn send(&self, chunk: Bytes) -> Result<(), TranscriptionError> {
        if self.shutdown.is_cancelled() {
            return Err(TranscriptionError::Stream("stream is closed".to_string()));
        }
        self.sender
            .send(Message::Binary(chunk))
            .map_err(|_| TranscriptionError::Stream("stream is closed".to_string()))
    }

    async fn finish(&self) -> Result<(), TranscriptionError> {
        self.shutdown.cancel();
        Ok(())
    }

    fn is_ready(&self) -> bool {
        !self.shutdown.is_cancelled() && !self.sender.is_closed()
    }
}

impl Drop for DeepgramTranscriptionStream {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
