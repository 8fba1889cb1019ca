use thiserror::Error;

use crate::core::context::ContextError;
use crate::core::llm::GenerationError;
use crate::core::recovery::{Classify, FailureKind};
use crate::core::stt::TranscriptionError;
use crate::core::tts::SynthesisError;

/// Failure of any step a session drives
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transcription(#[from] TranscriptionError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Classify for SessionError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            SessionError::Transcription(e) => e.failure_kind(),
            SessionError::Generation(e) => e.failure_kind(),
            SessionError::Synthesis(e) => e.failure_kind(),
            SessionError::Context(e) => e.failure_kind(),
            SessionError::Timeout(_) => FailureKind::Timeout,
            SessionError::InvalidRequest(_) => FailureKind::InvalidRequest,
        }
    }
}
