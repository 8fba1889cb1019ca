//! Response pipeline for one final transcript.
//!
//! context -> generate -> persist -> `transcriptionComplete` -> synthesized audio in
//! produced order -> `audioComplete`. The whole run is scoped by a cancellation token so a
//! stopped session never sees late results.

use std::future::Future;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::controller::SessionServices;
use super::errors::SessionError;
use super::protocol::{MessageRoute, OutgoingMessage};
use super::settings::SessionSettings;
use crate::core::context::ContextError;
use crate::core::llm::{AiResponse, GenerationError, GenerationRequest};
use crate::core::stt::TranscriptEvent;
use crate::core::tts::SynthesisError;

/// Result of one pipeline run
#[derive(Debug)]
pub enum PipelineOutcome {
    /// Audio fully delivered and `audioComplete` sent
    Completed { chunks: usize },
    Failed(SessionError),
    /// Cancelled by the session or the client went away
    Cancelled,
}

/// Input of one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineJob {
    pub session_id: String,
    pub user_id: String,
    pub language: String,
    pub transcript: TranscriptEvent,
}

enum StepError {
    Session(SessionError),
    /// The outgoing channel closed
    ClientGone,
}

macro_rules! step_error_from {
    ($($source:ty),*) => {
        $(
            impl From<$source> for StepError {
                fn from(error: $source) -> Self {
                    StepError::Session(error.into())
                }
            }
        )*
    };
}

step_error_from!(SessionError, ContextError, GenerationError, SynthesisError);

pub async fn run_pipeline(
    services: SessionServices,
    settings: &SessionSettings,
    outgoing: mpsc::Sender<MessageRoute>,
    job: PipelineJob,
    cancel: CancellationToken,
) -> PipelineOutcome {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(session_id = %job.session_id, "Response pipeline cancelled");
            PipelineOutcome::Cancelled
        }
        result = respond(&services, settings, &outgoing, &job) => match result {
            Ok(chunks) => PipelineOutcome::Completed { chunks },
            Err(StepError::Session(e)) => PipelineOutcome::Failed(e),
            Err(StepError::ClientGone) => PipelineOutcome::Cancelled,
        },
    }
}

async fn respond(
    services: &SessionServices,
    settings: &SessionSettings,
    outgoing: &mpsc::Sender<MessageRoute>,
    job: &PipelineJob,
) -> Result<usize, StepError> {
    let user_text = job.transcript.text.trim();
    let response = answer(services, settings, &job.user_id, &job.language, user_text).await?;

    info!(
        session_id = %job.session_id,
        user_id = %job.user_id,
        response_len = response.text.len(),
        "Generated coaching response"
    );

    let response_text = response.text.clone();
    emit(
        outgoing,
        MessageRoute::Outgoing(OutgoingMessage::TranscriptionComplete {
            transcript: user_text.to_string(),
            confidence: job.transcript.confidence,
            words: job.transcript.words.clone(),
            ai_response: response,
            metadata: job.transcript.annotations.clone(),
        }),
    )
    .await?;

    let mut audio = services
        .synthesizer
        .synthesize(&response_text, &settings.synthesis)
        .await?;

    let mut chunks = 0;
    while let Some(chunk) =
        bounded(settings.synthesis_timeout, "speech synthesis", audio.next()).await?
    {
        let chunk = chunk?;
        if chunk.is_empty() {
            continue;
        }
        emit(outgoing, MessageRoute::Audio(chunk)).await?;
        chunks += 1;
    }

    emit(outgoing, MessageRoute::Outgoing(OutgoingMessage::AudioComplete)).await?;
    debug!(session_id = %job.session_id, chunks, "Synthesized audio delivered");

    Ok(chunks)
}

/// Context, generation and persistence for one user utterance
pub(super) async fn answer(
    services: &SessionServices,
    settings: &SessionSettings,
    user_id: &str,
    language: &str,
    user_text: &str,
) -> Result<AiResponse, SessionError> {
    let context = services.context.user_context(user_id).await?;
    let request = GenerationRequest {
        user_context: context.profile_summary(),
        training_history: context.training_history(),
        conversation_history: context.conversation_history(),
        user_input: user_text.to_string(),
        language: language.to_string(),
    };

    let response = bounded(
        settings.response_timeout,
        "response generation",
        services.generator.generate(&request),
    )
    .await??;

    services
        .conversations
        .save(user_id, user_text, &response.text)
        .await?;
    Ok(response)
}

pub(super) async fn bounded<F: Future>(
    limit: Duration,
    step: &'static str,
    future: F,
) -> Result<F::Output, SessionError> {
    timeout(limit, future)
        .await
        .map_err(|_| SessionError::Timeout(step))
}

async fn emit(outgoing: &mpsc::Sender<MessageRoute>, route: MessageRoute) -> Result<(), StepError> {
    outgoing
        .send(route)
        .await
        .map_err(|_| StepError::ClientGone)
}
