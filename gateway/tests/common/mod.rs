//! Shared fakes and server harness for integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use coach_gateway::core::context::{InMemoryUserStore, UserProfile, UserSeed, WorkoutPlan};
use coach_gateway::core::llm::{
    AiResponse, GenerationError, GenerationRequest, ResponseGenerator, ResponseMetadata,
};
use coach_gateway::core::relay::{AudioSink, SinkError};
use coach_gateway::core::session::SessionServices;
use coach_gateway::core::stt::{
    RecordedTranscript, RecordingOptions, RecordingTranscriber, StreamEvent, StreamEventCallback,
    TranscriptEvent, TranscriptionError, TranscriptionOptions, TranscriptionProvider,
    TranscriptionStream,
};
use coach_gateway::core::tts::{AudioStream, SpeechSynthesizer, SynthesisError, SynthesisOptions};
use coach_gateway::{AppState, ServerConfig, routes};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Fakes
// =============================================================================

/// Treats every audio chunk as UTF-8 speech: `interim:` chunks become interim transcripts,
/// anything else a final transcript
pub struct EchoStream {
    on_event: StreamEventCallback,
    finished: AtomicBool,
}

#[async_trait]
impl AudioSink for EchoStream {
    async fn send_chunk(&self, chunk: Bytes) -> Result<(), SinkError> {
        self.send(chunk).await.map_err(Into::into)
    }
}

#[async_trait]
impl TranscriptionStream for EchoStream {
    async fn send(&self, chunk: Bytes) -> Result<(), TranscriptionError> {
        let text = String::from_utf8_lossy(&chunk).to_string();
        let event = match text.strip_prefix("interim:") {
            Some(partial) => TranscriptEvent::new(partial, false, 0.5),
            None => TranscriptEvent::new(text, true, 0.95),
        };
        (self.on_event)(StreamEvent::Transcript(event)).await;
        Ok(())
    }

    async fn finish(&self) -> Result<(), TranscriptionError> {
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        !self.finished.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct EchoTranscription {
    pub opened: AtomicUsize,
}

#[async_trait]
impl TranscriptionProvider for EchoTranscription {
    async fn open_stream(
        &self,
        _options: &TranscriptionOptions,
        on_event: StreamEventCallback,
    ) -> Result<Arc<dyn TranscriptionStream>, TranscriptionError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(EchoStream {
            on_event,
            finished: AtomicBool::new(false),
        }))
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}

#[derive(Default)]
pub struct ScriptedCoach {
    pub inputs: Mutex<Vec<String>>,
}

#[async_trait]
impl ResponseGenerator for ScriptedCoach {
    async fn generate(&self, request: &GenerationRequest) -> Result<AiResponse, GenerationError> {
        self.inputs.lock().push(request.user_input.clone());
        Ok(AiResponse {
            text: "Haz tres series de sentadillas".to_string(),
            metadata: ResponseMetadata {
                model: "scripted".to_string(),
                kind: "fitness_response".to_string(),
            },
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub struct TwoChunkVoice;

#[async_trait]
impl SpeechSynthesizer for TwoChunkVoice {
    async fn synthesize(
        &self,
        _text: &str,
        _options: &SynthesisOptions,
    ) -> Result<AudioStream, SynthesisError> {
        let chunks = vec![
            Ok(Bytes::from_static(b"pcm-1")),
            Ok(Bytes::from_static(b"pcm-2")),
        ];
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    fn name(&self) -> &'static str {
        "two-chunk"
    }
}

/// Hears the uploaded bytes as UTF-8 speech
pub struct EchoRecordings;

#[async_trait]
impl RecordingTranscriber for EchoRecordings {
    async fn transcribe(
        &self,
        audio: Bytes,
        _options: &RecordingOptions,
    ) -> Result<RecordedTranscript, TranscriptionError> {
        Ok(RecordedTranscript {
            text: String::from_utf8_lossy(&audio).to_string(),
            confidence: 0.9,
            ..Default::default()
        })
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}

pub fn seeded_store() -> Arc<InMemoryUserStore> {
    Arc::new(InMemoryUserStore::with_users([UserSeed {
        profile: UserProfile {
            id: "u1".to_string(),
            name: "Ana".to_string(),
            fitness_level: "intermediate".to_string(),
            fitness_goals: vec!["fuerza".to_string()],
        },
        workout_plans: vec![WorkoutPlan {
            name: "Pierna A".to_string(),
        }],
    }]))
}

pub struct Fakes {
    pub transcription: Arc<EchoTranscription>,
    pub coach: Arc<ScriptedCoach>,
    pub store: Arc<InMemoryUserStore>,
}

impl Fakes {
    pub fn new() -> Self {
        Self {
            transcription: Arc::new(EchoTranscription::default()),
            coach: Arc::new(ScriptedCoach::default()),
            store: seeded_store(),
        }
    }

    pub fn services(&self) -> SessionServices {
        SessionServices {
            transcription: self.transcription.clone(),
            generator: self.coach.clone(),
            synthesizer: Arc::new(TwoChunkVoice),
            context: self.store.clone(),
            conversations: self.store.clone(),
            recordings: Arc::new(EchoRecordings),
        }
    }
}

// =============================================================================
// Server harness
// =============================================================================

/// Config tuned for fast tests
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.audio_process_interval_ms = 5;
    config.reconnect_delay_ms = 10;
    config
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<AppState>,
    pub fakes: Fakes,
}

impl TestServer {
    pub async fn start(config: ServerConfig) -> Self {
        let fakes = Fakes::new();
        let state = AppState::with_services(config, fakes.services());
        let app = routes::create_app_router(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        Self { addr, state, fakes }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub async fn connect(&self) -> Client {
        let (client, _) = connect_async(self.ws_url()).await.unwrap();
        client
    }
}

// =============================================================================
// Client helpers
// =============================================================================

pub enum Frame {
    Json(serde_json::Value),
    Audio(Bytes),
}

/// Next JSON or binary frame, skipping heartbeat pings
pub async fn next_frame(client: &mut Client) -> Frame {
    loop {
        let message = tokio::time::timeout(WAIT, client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .expect("websocket error");
        match message {
            Message::Text(text) => {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                if value["type"] == "ping" {
                    continue;
                }
                return Frame::Json(value);
            }
            Message::Binary(data) => return Frame::Audio(data),
            _ => continue,
        }
    }
}

pub async fn next_json(client: &mut Client) -> serde_json::Value {
    match next_frame(client).await {
        Frame::Json(value) => value,
        Frame::Audio(data) => panic!("expected JSON, got {} audio bytes", data.len()),
    }
}

pub async fn send_json(client: &mut Client, value: serde_json::Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

pub async fn send_audio(client: &mut Client, data: &'static [u8]) {
    client
        .send(Message::Binary(Bytes::from_static(data)))
        .await
        .unwrap();
}

/// Start a session for `u1` and return its id
pub async fn start_session(client: &mut Client) -> String {
    send_json(
        client,
        serde_json::json!({"type": "startStream", "userId": "u1", "language": "es"}),
    )
    .await;
    let ready = next_json(client).await;
    assert_eq!(ready["type"], "streamReady", "{ready}");
    ready["sessionId"].as_str().unwrap().to_string()
}

/// Poll until `condition` holds or the wait budget runs out
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
