//! Session state machine.
//!
//! One controller task runs per WebSocket connection and consumes [`SessionEvent`]s
//! serially: client commands, transcription events, heartbeat loss, and completion of the
//! background tasks it spawned (first stream open, response pipeline, stream recovery).
//! Because nothing else
//! mutates the session, the processing flag and the recovery guard need no locking.
//!
//! Background tasks are scoped by the session's [`CancellationToken`]. Events coming from a
//! superseded stream or from a previous session on the same connection carry a stale
//! generation or epoch and are dropped.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::errors::SessionError;
use super::notifier::ClientNotifier;
use super::pipeline::{PipelineJob, PipelineOutcome, run_pipeline};
use super::protocol::{ClientCommand, MAX_USER_ID_LEN, MessageRoute, OutgoingMessage};
use super::registry::{SessionRegistry, SessionSummary};
use super::settings::SessionSettings;
use crate::core::context::{ContextProvider, ConversationStore};
use crate::core::liveness::{ConnectionLossCallback, LivenessMonitor, ProbeCallback};
use crate::core::llm::ResponseGenerator;
use crate::core::recovery::{Classify, RecoveryCoordinator, RecoveryOutcome};
use crate::core::relay::{AudioRelay, AudioSink};
use crate::core::stt::{
    RecordingTranscriber, StreamEvent, StreamEventCallback, TranscriptEvent, TranscriptionError,
    TranscriptionOptions, TranscriptionProvider, TranscriptionStream,
};
use crate::core::tts::SpeechSynthesizer;

/// Capacity of the per-session event queue
pub const SESSION_EVENT_BUFFER: usize = 1024;

/// Upper bound on closing a transcription stream during cleanup
const STREAM_FINISH_TIMEOUT: Duration = Duration::from_secs(2);

static LANGUAGE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]{2,3}(-[A-Za-z0-9]{2,8})*$").unwrap());

static USER_ID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9._@:-]+$").unwrap());

/// External collaborators a session drives
#[derive(Clone)]
pub struct SessionServices {
    pub transcription: Arc<dyn TranscriptionProvider>,
    pub generator: Arc<dyn ResponseGenerator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub context: Arc<dyn ContextProvider>,
    pub conversations: Arc<dyn ConversationStore>,
    /// Whole-recording transcription for batch voice requests
    pub recordings: Arc<dyn RecordingTranscriber>,
}

impl fmt::Debug for SessionServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionServices")
            .field("transcription", &self.transcription.name())
            .field("generator", &self.generator.name())
            .field("synthesizer", &self.synthesizer.name())
            .field("recordings", &self.recordings.name())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Streaming,
    ProcessingFinal,
    Recovering,
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Streaming => "streaming",
            SessionState::ProcessingFinal => "processing_final",
            SessionState::Recovering => "recovering",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the controller reacts to
pub enum SessionEvent {
    Client(ClientCommand),
    /// The client connection is gone
    Disconnected,
    Transcription {
        generation: u64,
        event: StreamEvent,
    },
    HeartbeatLost {
        epoch: u64,
        silent_for: Duration,
    },
    /// The first transcription stream of a session finished opening
    StreamOpened {
        epoch: u64,
        generation: u64,
        result: Result<Arc<dyn TranscriptionStream>, TranscriptionError>,
    },
    PipelineFinished {
        epoch: u64,
        outcome: PipelineOutcome,
    },
    RecoveryFinished {
        epoch: u64,
        generation: u64,
        outcome: RecoveryOutcome<Arc<dyn TranscriptionStream>>,
    },
}

/// Sending half of a session's event queue
#[derive(Clone)]
pub struct SessionHandle {
    events: mpsc::Sender<SessionEvent>,
}

impl SessionHandle {
    /// Deliver a client command. Returns false once the session task has ended.
    pub async fn command(&self, command: ClientCommand) -> bool {
        self.events.send(SessionEvent::Client(command)).await.is_ok()
    }

    /// Tear the session down and end its task
    pub async fn disconnect(&self) {
        let _ = self.events.send(SessionEvent::Disconnected).await;
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

/// Resources of a started session
struct ActiveSession {
    session_id: String,
    user_id: String,
    language: String,
    stream: Option<Arc<dyn TranscriptionStream>>,
    relay: AudioRelay,
    liveness: LivenessMonitor,
    recovery: Arc<RecoveryCoordinator>,
    /// Single-flight guard for the response pipeline
    processing: bool,
    last_transcript: String,
    ready_sent: bool,
    cancel: CancellationToken,
}

pub struct SessionController {
    services: SessionServices,
    settings: Arc<SessionSettings>,
    registry: SessionRegistry,
    outgoing: mpsc::Sender<MessageRoute>,
    events: mpsc::WeakSender<SessionEvent>,
    state: SessionState,
    active: Option<ActiveSession>,
    /// Incremented on every start so late events of a previous session are recognized
    epoch: u64,
    /// Incremented whenever the transcription stream is replaced or dropped
    generation: u64,
}

impl SessionController {
    /// Spawn a controller task for one connection.
    ///
    /// Outgoing protocol messages and synthesized audio are written to `outgoing`. The task
    /// ends after [`SessionHandle::disconnect`] or once every handle is dropped.
    pub fn spawn(
        services: SessionServices,
        settings: Arc<SessionSettings>,
        registry: SessionRegistry,
        outgoing: mpsc::Sender<MessageRoute>,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (events_tx, events_rx) = mpsc::channel(SESSION_EVENT_BUFFER);
        let controller = SessionController {
            services,
            settings,
            registry,
            outgoing,
            events: events_tx.downgrade(),
            state: SessionState::Idle,
            active: None,
            epoch: 0,
            generation: 0,
        };
        let task = tokio::spawn(controller.run(events_rx));
        (SessionHandle { events: events_tx }, task)
    }

    async fn run(mut self, mut events: mpsc::Receiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Disconnected => break,
                SessionEvent::Client(command) => self.handle_command(command).await,
                SessionEvent::Transcription { generation, event } => {
                    if generation == self.generation {
                        self.handle_stream_event(event).await;
                    }
                }
                SessionEvent::HeartbeatLost { epoch, silent_for } => {
                    if epoch == self.epoch {
                        self.handle_heartbeat_lost(silent_for).await;
                    }
                }
                SessionEvent::StreamOpened {
                    epoch,
                    generation,
                    result,
                } => {
                    self.handle_stream_opened(epoch, generation, result).await;
                }
                SessionEvent::PipelineFinished { epoch, outcome } => {
                    if epoch == self.epoch {
                        self.handle_pipeline_finished(outcome).await;
                    }
                }
                SessionEvent::RecoveryFinished {
                    epoch,
                    generation,
                    outcome,
                } => {
                    self.handle_recovery_finished(epoch, generation, outcome)
                        .await;
                }
            }
        }

        self.cleanup().await;
        debug!("Session task finished");
    }

    // =========================================================================
    // Client commands
    // =========================================================================

    async fn handle_command(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::StartStream { user_id, language } => {
                self.start(user_id, language).await;
            }
            ClientCommand::AudioChunk(chunk) => match &self.active {
                Some(active) => active.relay.add_chunk(chunk),
                None => debug!(bytes = chunk.len(), "Audio received without an active stream"),
            },
            ClientCommand::StopStream => {
                if self.active.is_some() {
                    self.cleanup().await;
                } else {
                    debug!("Stop requested without an active stream");
                }
            }
            ClientCommand::Pong => {
                if let Some(active) = &self.active {
                    active.liveness.acknowledge();
                }
            }
        }
    }

    async fn start(&mut self, user_id: String, language: Option<String>) {
        if self.active.is_some() {
            self.emit(OutgoingMessage::error("Stream already active", None))
                .await;
            return;
        }

        let language = language
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| self.settings.default_language.clone());

        if let Err(e) = validate_start(&user_id, &language) {
            warn!(user_id = %user_id, error = %e, "Rejected stream start");
            self.emit(OutgoingMessage::error(
                "Invalid start request",
                Some(e.to_string()),
            ))
            .await;
            return;
        }

        self.epoch += 1;
        self.state = SessionState::Starting;
        let session_id = Uuid::new_v4().to_string();
        info!(session_id = %session_id, user_id = %user_id, language = %language, "Starting session");

        self.active = Some(ActiveSession {
            session_id,
            user_id,
            language,
            stream: None,
            relay: AudioRelay::new(self.settings.relay_capacity, self.settings.relay_tick),
            liveness: LivenessMonitor::new(self.settings.heartbeat_interval),
            recovery: Arc::new(RecoveryCoordinator::new(self.settings.recovery)),
            processing: false,
            last_transcript: String::new(),
            ready_sent: false,
            cancel: CancellationToken::new(),
        });

        self.open_first_stream();
    }

    // =========================================================================
    // Transcription stream
    // =========================================================================

    /// Open the session's first stream off the controller task so that stop and
    /// disconnect stay responsive while the provider connects
    fn open_first_stream(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        let epoch = self.epoch;
        let Some(active) = self.active.as_ref() else {
            return;
        };
        let cancel = active.cancel.child_token();
        let provider = self.services.transcription.clone();
        let options = self.stream_options();
        let callback = self.stream_callback(generation);
        let events = self.events.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Stream open abandoned, session stopped");
                    return;
                }
                result = provider.open_stream(&options, callback) => result,
            };

            match events.upgrade() {
                Some(events) => {
                    let _ = events
                        .send(SessionEvent::StreamOpened {
                            epoch,
                            generation,
                            result,
                        })
                        .await;
                }
                None => {
                    if let Ok(stream) = result {
                        finish_stream(stream).await;
                    }
                }
            }
        });
    }

    async fn handle_stream_opened(
        &mut self,
        epoch: u64,
        generation: u64,
        result: Result<Arc<dyn TranscriptionStream>, TranscriptionError>,
    ) {
        let current = epoch == self.epoch && generation == self.generation && self.active.is_some();
        if !current {
            if let Ok(stream) = result {
                debug!("Closing stream opened for a stopped session");
                finish_stream(stream).await;
            }
            return;
        }

        match result {
            Ok(stream) => {
                self.attach_stream(stream);
                self.mark_ready().await;
            }
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "Transcription stream failed to open, recovering");
                self.begin_recovery(e.to_string());
            }
            Err(e) => {
                error!(error = %e, "Transcription stream failed to open");
                self.emit(OutgoingMessage::error(
                    "Failed to start stream",
                    Some(e.to_string()),
                ))
                .await;
                self.cleanup().await;
            }
        }
    }

    fn stream_options(&self) -> TranscriptionOptions {
        TranscriptionOptions {
            language: self
                .active
                .as_ref()
                .map(|a| a.language.clone())
                .unwrap_or_else(|| self.settings.default_language.clone()),
        }
    }

    fn stream_callback(&self, generation: u64) -> StreamEventCallback {
        let events = self.events.clone();
        Arc::new(move |event| {
            let events = events.clone();
            Box::pin(async move {
                if let Some(events) = events.upgrade() {
                    let _ = events
                        .send(SessionEvent::Transcription { generation, event })
                        .await;
                }
            })
        })
    }

    fn attach_stream(&mut self, stream: Arc<dyn TranscriptionStream>) {
        if let Some(active) = self.active.as_mut() {
            let sink: Arc<dyn AudioSink> = stream.clone();
            active.relay.start_processing(sink);
            active.stream = Some(stream);
        }
    }

    /// Enter streaming, announcing readiness the first time
    async fn mark_ready(&mut self) {
        let epoch = self.epoch;
        let probe = self.probe_callback();
        let on_loss = self.loss_callback(epoch);

        let Some(active) = self.active.as_mut() else {
            return;
        };
        active.liveness.start(probe, on_loss);
        self.state = if active.processing {
            SessionState::ProcessingFinal
        } else {
            SessionState::Streaming
        };

        if active.ready_sent {
            return;
        }
        active.ready_sent = true;
        self.registry.register(SessionSummary::new(
            &active.session_id,
            &active.user_id,
            &active.language,
        ));
        let session_id = active.session_id.clone();
        info!(session_id = %session_id, "Session ready");
        self.emit(OutgoingMessage::StreamReady { session_id }).await;
    }

    fn probe_callback(&self) -> ProbeCallback {
        let outgoing = self.outgoing.clone();
        Arc::new(move || {
            let outgoing = outgoing.clone();
            Box::pin(async move {
                let _ = outgoing
                    .send(MessageRoute::Outgoing(OutgoingMessage::Ping))
                    .await;
            })
        })
    }

    fn loss_callback(&self, epoch: u64) -> ConnectionLossCallback {
        let events = self.events.clone();
        Arc::new(move |silent_for| {
            let events = events.clone();
            Box::pin(async move {
                if let Some(events) = events.upgrade() {
                    let _ = events
                        .send(SessionEvent::HeartbeatLost { epoch, silent_for })
                        .await;
                }
            })
        })
    }

    async fn handle_stream_event(&mut self, event: StreamEvent) {
        if self.active.is_none() {
            return;
        }

        match event {
            StreamEvent::Transcript(transcript) if transcript.is_final => {
                self.handle_final_transcript(transcript);
            }
            StreamEvent::Transcript(transcript) => {
                self.emit(OutgoingMessage::InterimTranscript {
                    transcript: transcript.text,
                    words: transcript.words,
                    confidence: transcript.confidence,
                    metadata: transcript.annotations,
                })
                .await;
            }
            StreamEvent::Metadata(fields) => {
                self.emit(OutgoingMessage::Metadata { fields }).await;
            }
            StreamEvent::UtteranceEnd => self.emit(OutgoingMessage::UtteranceEnd).await,
            StreamEvent::Error(e) if e.is_retryable() => {
                warn!(error = %e, "Transcription stream failed, recovering");
                self.begin_recovery(e.to_string());
            }
            StreamEvent::Error(e) => {
                error!(error = %e, "Transcription stream error");
                self.emit(OutgoingMessage::error("Streaming error", Some(e.to_string())))
                    .await;
            }
            StreamEvent::Closed => {
                warn!("Transcription stream closed by provider, recovering");
                self.begin_recovery("transcription stream closed".to_string());
            }
        }
    }

    // =========================================================================
    // Response pipeline
    // =========================================================================

    fn handle_final_transcript(&mut self, transcript: TranscriptEvent) {
        let epoch = self.epoch;
        let Some(active) = self.active.as_mut() else {
            return;
        };

        if transcript.text.trim().is_empty() {
            return;
        }
        if active.processing {
            debug!(
                session_id = %active.session_id,
                dropped = %transcript.text,
                "Response already in flight, dropping final transcript"
            );
            return;
        }

        active.processing = true;
        active.last_transcript = transcript.text.clone();
        if self.state == SessionState::Streaming {
            self.state = SessionState::ProcessingFinal;
        }

        let job = PipelineJob {
            session_id: active.session_id.clone(),
            user_id: active.user_id.clone(),
            language: active.language.clone(),
            transcript,
        };
        let cancel = active.cancel.child_token();
        let services = self.services.clone();
        let settings = self.settings.clone();
        let outgoing = self.outgoing.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let outcome = run_pipeline(services, &settings, outgoing, job, cancel).await;
            if let Some(events) = events.upgrade() {
                let _ = events
                    .send(SessionEvent::PipelineFinished { epoch, outcome })
                    .await;
            }
        });
    }

    async fn handle_pipeline_finished(&mut self, outcome: PipelineOutcome) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        active.processing = false;
        if self.state == SessionState::ProcessingFinal {
            self.state = SessionState::Streaming;
        }

        match outcome {
            PipelineOutcome::Completed { chunks } => {
                debug!(session_id = %active.session_id, chunks, "Response pipeline completed");
            }
            PipelineOutcome::Cancelled => {}
            PipelineOutcome::Failed(e) => {
                error!(
                    session_id = %active.session_id,
                    transcript = %active.last_transcript,
                    error = %e,
                    "Response pipeline failed"
                );
                let retryable = e.is_retryable();
                self.emit(OutgoingMessage::error(
                    "Failed to process response",
                    Some(e.to_string()),
                ))
                .await;
                if retryable {
                    self.begin_recovery(e.to_string());
                }
            }
        }
    }

    // =========================================================================
    // Liveness and recovery
    // =========================================================================

    async fn handle_heartbeat_lost(&mut self, silent_for: Duration) {
        if self.active.is_none() || self.state == SessionState::Recovering {
            return;
        }
        warn!(
            silent_ms = silent_for.as_millis() as u64,
            "Heartbeat lost, recovering transcription stream"
        );
        self.begin_recovery(SessionError::Timeout("heartbeat").to_string());
    }

    /// Pause audio, drop the current stream and rebuild it in the background
    fn begin_recovery(&mut self, reason: String) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if self.state == SessionState::Recovering || active.recovery.is_recovering() {
            debug!(session_id = %active.session_id, "Recovery already in progress");
            return;
        }

        info!(session_id = %active.session_id, reason = %reason, "Recovering transcription stream");
        self.state = SessionState::Recovering;
        active.relay.pause();
        active.liveness.stop();
        if let Some(stale) = active.stream.take() {
            tokio::spawn(finish_stream(stale));
        }

        self.generation += 1;
        let generation = self.generation;
        let epoch = self.epoch;
        let Some(active) = self.active.as_ref() else {
            return;
        };
        let coordinator = active.recovery.clone();
        let cancel = active.cancel.child_token();
        let notifier = ClientNotifier::new(self.outgoing.clone());
        let provider = self.services.transcription.clone();
        let options = self.stream_options();
        let callback = self.stream_callback(generation);
        let events = self.events.clone();

        tokio::spawn(async move {
            let outcome = coordinator
                .handle_recovery(&notifier, &cancel, |_attempt| {
                    let provider = provider.clone();
                    let options = options.clone();
                    let callback = callback.clone();
                    async move { provider.open_stream(&options, callback).await }
                })
                .await;

            if let Some(events) = events.upgrade() {
                let _ = events
                    .send(SessionEvent::RecoveryFinished {
                        epoch,
                        generation,
                        outcome,
                    })
                    .await;
            }
        });
    }

    async fn handle_recovery_finished(
        &mut self,
        epoch: u64,
        generation: u64,
        outcome: RecoveryOutcome<Arc<dyn TranscriptionStream>>,
    ) {
        let current = epoch == self.epoch && generation == self.generation && self.active.is_some();

        match outcome {
            RecoveryOutcome::Recovered(stream) if current => {
                self.attach_stream(stream);
                self.mark_ready().await;
            }
            RecoveryOutcome::Recovered(stream) => finish_stream(stream).await,
            RecoveryOutcome::Exhausted {
                attempts,
                last_error,
            } if current => {
                error!(
                    attempts,
                    last_error = last_error.as_deref().unwrap_or("none"),
                    "Transcription stream could not be recovered, closing session"
                );
                let details = last_error
                    .unwrap_or_else(|| format!("recovery failed after {attempts} attempts"));
                self.emit(OutgoingMessage::error("Streaming error", Some(details)))
                    .await;
                self.cleanup().await;
            }
            RecoveryOutcome::InProgress => debug!("Recovery already running"),
            RecoveryOutcome::Exhausted { .. } | RecoveryOutcome::Cancelled => {}
        }
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Release every session resource. Safe to call repeatedly.
    async fn cleanup(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };

        active.cancel.cancel();
        active.relay.clear();
        active.liveness.stop();
        if let Some(stream) = active.stream.take() {
            finish_stream(stream).await;
        }
        self.registry.remove(&active.session_id);
        self.generation += 1;
        self.state = SessionState::Closed;

        info!(session_id = %active.session_id, user_id = %active.user_id, "Session closed");
    }

    async fn emit(&self, message: OutgoingMessage) {
        if self
            .outgoing
            .send(MessageRoute::Outgoing(message))
            .await
            .is_err()
        {
            debug!("Client channel closed, dropping outgoing message");
        }
    }
}

/// Close a transcription stream, logging rather than propagating failures
async fn finish_stream(stream: Arc<dyn TranscriptionStream>) {
    match timeout(STREAM_FINISH_TIMEOUT, stream.finish()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Failed to finish transcription stream"),
        Err(_) => warn!("Timed out finishing transcription stream"),
    }
}

/// Check a user id and language code before any collaborator is called
pub(super) fn validate_start(user_id: &str, language: &str) -> Result<(), SessionError> {
    if user_id.is_empty() {
        return Err(SessionError::InvalidRequest("userId is required".into()));
    }
    if user_id.len() > MAX_USER_ID_LEN {
        return Err(SessionError::InvalidRequest(format!(
            "userId exceeds {MAX_USER_ID_LEN} characters"
        )));
    }
    if !USER_ID_PATTERN.is_match(user_id) {
        return Err(SessionError::InvalidRequest(
            "userId contains invalid characters".into(),
        ));
    }
    if !LANGUAGE_PATTERN.is_match(language) {
        return Err(SessionError::InvalidRequest(format!(
            "unsupported language code '{language}'"
        )));
    }
    Ok(())
}
