//! Deepgram prerecorded transcription over HTTP.
//!
//! Used for batch voice requests: the whole recording is uploaded in one `POST /v1/listen`
//! and the response carries the transcript plus summary, topics and sentiment.

use async_trait::async_trait;
use bytes::Bytes;
use http::{StatusCode, header::CONTENT_TYPE};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::base::{
    RecordedTranscript, RecordingOptions, RecordingTranscriber, TranscriptionError, WordTiming,
};
use super::deepgram::DeepgramWord;
use crate::core::recovery::FailureKind;

pub const DEEPGRAM_PRERECORDED_URL: &str = "https://api.deepgram.com/v1/listen";

#[derive(Debug, Clone)]
pub struct DeepgramRecordingTranscriber {
    client: reqwest::Client,
    api_key: Option<String>,
    url: String,
    model: String,
}

impl DeepgramRecordingTranscriber {
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        Self::with_url(api_key, model, DEEPGRAM_PRERECORDED_URL)
    }

    pub fn with_url(
        api_key: Option<String>,
        model: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            url: url.into(),
            model: model.into(),
        }
    }

    fn build_url(&self, options: &RecordingOptions) -> Result<Url, TranscriptionError> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| TranscriptionError::Configuration(format!("Invalid listen URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("model", &self.model)
            .append_pair("language", &options.language)
            .append_pair("smart_format", "true")
            .append_pair("punctuate", "true")
            .append_pair("summarize", "v2")
            .append_pair("topics", "true")
            .append_pair("sentiment", "true");
        Ok(url)
    }
}

#[derive(Debug, Deserialize)]
struct PrerecordedResponse {
    results: PrerecordedResults,
}

#[derive(Debug, Deserialize)]
struct PrerecordedResults {
    #[serde(default)]
    channels: Vec<PrerecordedChannel>,
    summary: Option<PrerecordedSummary>,
    topics: Option<serde_json::Value>,
    sentiments: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PrerecordedChannel {
    #[serde(default)]
    alternatives: Vec<PrerecordedAlternative>,
}

#[derive(Debug, Deserialize)]
struct PrerecordedAlternative {
    transcript: String,
    confidence: f32,
    #[serde(default)]
    words: Vec<DeepgramWord>,
}

#[derive(Debug, Deserialize)]
struct PrerecordedSummary {
    short: Option<String>,
}

/// Turn a prerecorded response body into a transcript
pub fn parse_response(body: &[u8]) -> Result<RecordedTranscript, TranscriptionError> {
    let response: PrerecordedResponse = serde_json::from_slice(body)
        .map_err(|e| TranscriptionError::Provider(format!("Unparseable response: {e}")))?;
    let results = response.results;

    let alternative = results
        .channels
        .into_iter()
        .next()
        .and_then(|channel| channel.alternatives.into_iter().next())
        .ok_or_else(|| TranscriptionError::Provider("response has no transcript".to_string()))?;

    Ok(RecordedTranscript {
        text: alternative.transcript,
        confidence: alternative.confidence.clamp(0.0, 1.0),
        words: alternative.words.into_iter().map(WordTiming::from).collect(),
        summary: results.summary.and_then(|s| s.short),
        topics: results.topics,
        sentiment: results.sentiments,
    })
}

fn status_error(status: StatusCode, body: String) -> TranscriptionError {
    let detail = format!("Deepgram listen returned {status}: {body}");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            TranscriptionError::Authentication(detail)
        }
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            TranscriptionError::Configuration(detail)
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            TranscriptionError::Timeout(detail)
        }
        _ => TranscriptionError::Provider(detail),
    }
}

fn transport_error(error: reqwest::Error) -> TranscriptionError {
    TranscriptionError::from_kind(FailureKind::from_reqwest(&error), error.to_string())
}

#[async_trait]
impl RecordingTranscriber for DeepgramRecordingTranscriber {
    async fn transcribe(
        &self,
        audio: Bytes,
        options: &RecordingOptions,
    ) -> Result<RecordedTranscript, TranscriptionError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            TranscriptionError::Configuration("DEEPGRAM_API_KEY is not configured".to_string())
        })?;

        let url = self.build_url(options)?;
        debug!(bytes = audio.len(), language = %options.language, "Transcribing recording");

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Token {api_key}"))
            .header(CONTENT_TYPE, options.mimetype.as_str())
            .body(audio)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "Recording transcription rejected");
            return Err(status_error(status, body));
        }

        let body = response.bytes().await.map_err(transport_error)?;
        parse_response(&body)
    }

    fn name(&self) -> &'static str {
        "deepgram-prerecorded"
    }
}
