use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::recovery::{Classify, FailureKind};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GenerationError {
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("Invalid generation request: {0}")]
    InvalidRequest(String),
    #[error("Provider error: {0}")]
    Provider(String),
}

impl GenerationError {
    pub fn from_reqwest(error: reqwest::Error) -> Self {
        let message = error.to_string();
        match FailureKind::from_reqwest(&error) {
            FailureKind::Timeout => Self::Timeout(message),
            FailureKind::ConnectionRefused => Self::ConnectionRefused(message),
            FailureKind::Network | FailureKind::ConnectionReset | FailureKind::Stream => {
                Self::Network(message)
            }
            _ => Self::Provider(message),
        }
    }
}

impl Classify for GenerationError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Timeout(_) => FailureKind::Timeout,
            Self::ConnectionRefused(_) => FailureKind::ConnectionRefused,
            Self::Network(_) => FailureKind::Network,
            Self::Authentication(_) => FailureKind::Authentication,
            Self::InvalidRequest(_) => FailureKind::InvalidRequest,
            Self::Provider(_) => FailureKind::Provider,
        }
    }
}

/// Inputs of one coaching turn, already rendered to text
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GenerationRequest {
    pub user_context: String,
    pub training_history: String,
    pub conversation_history: String,
    pub user_input: String,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub model: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Generated coaching answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiResponse {
    pub text: String,
    pub metadata: ResponseMetadata,
}

#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<AiResponse, GenerationError>;

    fn name(&self) -> &'static str;
}
