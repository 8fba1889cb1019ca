//! Batch voice interaction: one recorded utterance in, one spoken answer out.
//!
//! Runs the same answer steps as the live pipeline, but transcribes the whole recording
//! up front and collects the synthesized reply instead of streaming it.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tracing::info;

use super::controller::{SessionServices, validate_start};
use super::errors::SessionError;
use super::pipeline::{answer, bounded};
use super::settings::SessionSettings;
use crate::core::llm::AiResponse;
use crate::core::stt::{RecordedTranscript, RecordingOptions};

/// One uploaded recording to answer
#[derive(Debug, Clone)]
pub struct RecordingRequest {
    pub user_id: String,
    pub language: String,
    pub mimetype: String,
    pub audio: Bytes,
}

#[derive(Debug, Clone)]
pub struct VoiceReply {
    pub transcript: RecordedTranscript,
    pub response: AiResponse,
    /// The full synthesized answer
    pub audio: Bytes,
}

pub async fn process_recording(
    services: &SessionServices,
    settings: &SessionSettings,
    request: RecordingRequest,
) -> Result<VoiceReply, SessionError> {
    validate_start(&request.user_id, &request.language)?;
    if request.audio.is_empty() {
        return Err(SessionError::InvalidRequest("audio is empty".into()));
    }

    let options = RecordingOptions {
        language: request.language.clone(),
        mimetype: request.mimetype,
    };
    let transcript = bounded(
        settings.response_timeout,
        "recording transcription",
        services.recordings.transcribe(request.audio, &options),
    )
    .await??;

    let user_text = transcript.text.trim();
    if user_text.is_empty() {
        return Err(SessionError::InvalidRequest(
            "no speech recognized in recording".into(),
        ));
    }

    let response = answer(
        services,
        settings,
        &request.user_id,
        &request.language,
        user_text,
    )
    .await?;

    let mut stream = services
        .synthesizer
        .synthesize(&response.text, &settings.synthesis)
        .await?;
    let mut audio = BytesMut::new();
    while let Some(chunk) =
        bounded(settings.synthesis_timeout, "speech synthesis", stream.next()).await?
    {
        audio.extend_from_slice(&chunk?);
    }

    info!(
        user_id = %request.user_id,
        response_len = response.text.len(),
        audio_bytes = audio.len(),
        "Answered recorded voice request"
    );

    Ok(VoiceReply {
        transcript,
        response,
        audio: audio.freeze(),
    })
}
