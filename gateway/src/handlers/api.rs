use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

use crate::core::context::ContextError;
use crate::core::session::{RecordingRequest, SessionError, SessionSummary, process_recording};
use crate::errors::{AppError, AppResult};
use crate::state::AppState;

/// Largest accepted `/voice/process` body (10 MB)
pub const MAX_VOICE_BODY_SIZE: usize = 10 * 1024 * 1024;

const DEFAULT_RECORDING_MIMETYPE: &str = "audio/wav";

/// Health check handler
/// Returns a simple JSON response indicating the server is running
pub async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(json!({
        "status": "OK"
    })))
}

/// List live sessions, oldest first
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Value> {
    let sessions = state.sessions.snapshot();
    Json(json!({
        "activeSessions": sessions.len(),
        "sessions": sessions,
    }))
}

/// Summary of one live session
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> AppResult<Json<SessionSummary>> {
    state
        .sessions
        .get(&session_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceProcessRequest {
    /// Base64-encoded recording
    pub audio_data: String,
    pub user_id: String,
    pub language: Option<String>,
    pub mimetype: Option<String>,
}

/// Answer one recorded utterance: transcribe, generate, persist, synthesize
pub async fn process_voice(
    State(state): State<Arc<AppState>>,
    Json(body): Json<VoiceProcessRequest>,
) -> AppResult<Json<Value>> {
    let audio = BASE64
        .decode(body.audio_data.trim())
        .map_err(|e| AppError::BadRequest(format!("audioData is not valid base64: {e}")))?;

    let language = body
        .language
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| state.session_settings.default_language.clone());
    info!(user_id = %body.user_id, language = %language, bytes = audio.len(), "Voice request received");

    let request = RecordingRequest {
        user_id: body.user_id,
        language,
        mimetype: body
            .mimetype
            .unwrap_or_else(|| DEFAULT_RECORDING_MIMETYPE.to_string()),
        audio: Bytes::from(audio),
    };

    let reply = process_recording(&state.services, &state.session_settings, request)
        .await
        .map_err(voice_error)?;

    Ok(Json(json!({
        "success": true,
        "transcription": reply.transcript.text,
        "textResponse": reply.response.text,
        "audioResponse": BASE64.encode(&reply.audio),
        "confidence": reply.transcript.confidence,
        "summary": reply.transcript.summary,
        "topics": reply.transcript.topics,
        "sentiment": reply.transcript.sentiment,
    })))
}

fn voice_error(error: SessionError) -> AppError {
    match error {
        SessionError::InvalidRequest(msg) => AppError::BadRequest(msg),
        SessionError::Context(ContextError::UserNotFound(user)) => {
            AppError::NotFound(format!("user {user}"))
        }
        other => AppError::InternalServerError(format!("voice processing failed: {other}")),
    }
}
