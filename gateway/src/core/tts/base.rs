use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use thiserror::Error;

use crate::core::recovery::{Classify, FailureKind};

/// Lazy, finite sequence of synthesized audio chunks. Not restartable.
pub type AudioStream = Pin<Box<dyn Stream<Item = Result<Bytes, SynthesisError>> + Send>>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SynthesisError {
    #[error("Connection timed out: {0}")]
    Timeout(String),
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Audio stream interrupted: {0}")]
    Stream(String),
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("Invalid synthesis request: {0}")]
    InvalidRequest(String),
    #[error("Provider error: {0}")]
    Provider(String),
}

impl SynthesisError {
    pub fn from_reqwest(error: reqwest::Error) -> Self {
        let message = error.to_string();
        match FailureKind::from_reqwest(&error) {
            FailureKind::Timeout => Self::Timeout(message),
            FailureKind::ConnectionRefused => Self::ConnectionRefused(message),
            FailureKind::Stream => Self::Stream(message),
            FailureKind::Network | FailureKind::ConnectionReset => Self::Network(message),
            _ => Self::Provider(message),
        }
    }
}

impl Classify for SynthesisError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Timeout(_) => FailureKind::Timeout,
            Self::ConnectionRefused(_) => FailureKind::ConnectionRefused,
            Self::Network(_) => FailureKind::Network,
            Self::Stream(_) => FailureKind::Stream,
            Self::Authentication(_) => FailureKind::Authentication,
            Self::InvalidRequest(_) => FailureKind::InvalidRequest,
            Self::Provider(_) => FailureKind::Provider,
        }
    }
}

/// Voice and output format for one synthesis request
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisOptions {
    pub voice: String,
    pub encoding: String,
    pub sample_rate: u32,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            voice: "aura-2-celeste-es".to_string(),
            encoding: "linear16".to_string(),
            sample_rate: 24000,
        }
    }
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Start synthesizing `text`; audio is pulled lazily from the returned stream
    async fn synthesize(
        &self,
        text: &str,
        options: &SynthesisOptions,
    ) -> Result<AudioStream, SynthesisError>;

    fn name(&self) -> &'static str;
}
