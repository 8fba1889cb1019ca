use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::recovery::{Classify, FailureKind};
use crate::core::relay::AudioSink;

/// Timing and confidence for a single recognized word
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordTiming {
    pub word: String,
    pub start: f64,
    pub end: f64,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub punctuated_word: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<u32>,
}

/// A transcription result, interim or final
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEvent {
    pub text: String,
    pub is_final: bool,
    /// Recognition confidence clamped to 0.0..=1.0
    pub confidence: f32,
    pub words: Vec<WordTiming>,
    /// Optional provider annotations such as sentiment or topics
    pub annotations: Option<serde_json::Value>,
}

impl TranscriptEvent {
    pub fn new(text: impl Into<String>, is_final: bool, confidence: f32) -> Self {
        Self {
            text: text.into(),
            is_final,
            confidence: confidence.clamp(0.0, 1.0),
            words: Vec::new(),
            annotations: None,
        }
    }

    pub fn with_words(mut self, words: Vec<WordTiming>) -> Self {
        self.words = words;
        self
    }

    pub fn with_annotations(mut self, annotations: serde_json::Value) -> Self {
        self.annotations = Some(annotations);
        self
    }
}

/// Everything a transcription stream reports back, dispatched by kind
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Transcript(TranscriptEvent),
    Metadata(serde_json::Map<String, serde_json::Value>),
    UtteranceEnd,
    Error(TranscriptionError),
    /// The provider closed the stream without being asked to
    Closed,
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Transcript(t) if t.is_final => "final_transcript",
            StreamEvent::Transcript(_) => "interim_transcript",
            StreamEvent::Metadata(_) => "metadata",
            StreamEvent::UtteranceEnd => "utterance_end",
            StreamEvent::Error(_) => "error",
            StreamEvent::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TranscriptionError {
    #[error("Connection reset: {0}")]
    ConnectionReset(String),
    #[error("Connection timed out: {0}")]
    Timeout(String),
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Stream error: {0}")]
    Stream(String),
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    #[error("Provider error: {0}")]
    Provider(String),
}

impl TranscriptionError {
    /// Build an error of the given category
    pub fn from_kind(kind: FailureKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            FailureKind::ConnectionReset => Self::ConnectionReset(message),
            FailureKind::Timeout => Self::Timeout(message),
            FailureKind::ConnectionRefused => Self::ConnectionRefused(message),
            FailureKind::Network => Self::Network(message),
            FailureKind::Stream => Self::Stream(message),
            FailureKind::Authentication => Self::Authentication(message),
            FailureKind::InvalidRequest => Self::Configuration(message),
            FailureKind::NotFound | FailureKind::Provider | FailureKind::Internal => {
                Self::Provider(message)
            }
        }
    }
}

impl Classify for TranscriptionError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            Self::ConnectionReset(_) => FailureKind::ConnectionReset,
            Self::Timeout(_) => FailureKind::Timeout,
            Self::ConnectionRefused(_) => FailureKind::ConnectionRefused,
            Self::Network(_) => FailureKind::Network,
            Self::Stream(_) => FailureKind::Stream,
            Self::Authentication(_) => FailureKind::Authentication,
            Self::Configuration(_) => FailureKind::InvalidRequest,
            Self::Provider(_) => FailureKind::Provider,
        }
    }
}

/// Per-stream options chosen by the session
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionOptions {
    pub language: String,
}

/// Callback receiving every event of one stream
pub type StreamEventCallback =
    Arc<dyn Fn(StreamEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// A live transcription stream. Audio goes in through [`AudioSink`], events come out
/// through the callback given at open time.
#[async_trait]
pub trait TranscriptionStream: AudioSink {
    /// Forward one chunk of audio
    async fn send(&self, chunk: Bytes) -> Result<(), TranscriptionError>;

    /// Flush and close the stream. Idempotent.
    async fn finish(&self) -> Result<(), TranscriptionError>;

    fn is_ready(&self) -> bool;
}

/// Opens transcription streams
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    async fn open_stream(
        &self,
        options: &TranscriptionOptions,
        on_event: StreamEventCallback,
    ) -> Result<Arc<dyn TranscriptionStream>, TranscriptionError>;

    fn name(&self) -> &'static str;
}

/// Options for transcribing a complete recording
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingOptions {
    pub language: String,
    /// Content type of the uploaded audio, e.g. `audio/wav`
    pub mimetype: String,
}

/// Transcript of a complete recording with the provider's audio intelligence results
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordedTranscript {
    pub text: String,
    pub confidence: f32,
    pub words: Vec<WordTiming>,
    pub summary: Option<String>,
    pub topics: Option<serde_json::Value>,
    pub sentiment: Option<serde_json::Value>,
}

/// Transcribes whole recordings in one request
#[async_trait]
pub trait RecordingTranscriber: Send + Sync {
    async fn transcribe(
        &self,
        audio: Bytes,
        options: &RecordingOptions,
    ) -> Result<RecordedTranscript, TranscriptionError>;

    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_is_clamped() {
        assert_eq!(TranscriptEvent::new("hola", true, 1.7).confidence, 1.0);
        assert_eq!(TranscriptEvent::new("hola", false, -0.2).confidence, 0.0);
    }

    #[test]
    fn test_event_kind() {
        assert_eq!(
            StreamEvent::Transcript(TranscriptEvent::new("a", true, 0.9)).kind(),
            "final_transcript"
        );
        assert_eq!(
            StreamEvent::Transcript(TranscriptEvent::new("a", false, 0.9)).kind(),
            "interim_transcript"
        );
        assert_eq!(StreamEvent::UtteranceEnd.kind(), "utterance_end");
    }

    #[test]
    fn test_error_classification_round_trip() {
        for kind in [
            FailureKind::ConnectionReset,
            FailureKind::Timeout,
            FailureKind::ConnectionRefused,
            FailureKind::Network,
            FailureKind::Stream,
            FailureKind::Authentication,
        ] {
            assert_eq!(TranscriptionError::from_kind(kind, "x").failure_kind(), kind);
        }
        assert!(TranscriptionError::Stream("socket closed".into()).is_retryable());
        assert!(!TranscriptionError::Authentication("bad key".into()).is_retryable());
    }

    #[test]
    fn test_word_timing_serializes_camel_case() {
        let word = WordTiming {
            word: "piernas".into(),
            start: 0.5,
            end: 0.9,
            confidence: 0.98,
            punctuated_word: Some("piernas?".into()),
            speaker: None,
        };
        let json = serde_json::to_value(&word).unwrap();
        assert_eq!(json["punctuatedWord"], "piernas?");
        assert!(json.get("speaker").is_none());
    }
}
