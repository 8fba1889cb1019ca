//! Deepgram Aura text-to-speech over HTTP.

use async_trait::async_trait;
use futures::StreamExt;
use http::StatusCode;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use super::base::{AudioStream, SpeechSynthesizer, SynthesisError, SynthesisOptions};

pub const DEEPGRAM_TTS_URL: &str = "https://api.deepgram.com/v1/speak";

#[derive(Debug, Clone)]
pub struct DeepgramTTS {
    client: reqwest::Client,
    api_key: Option<String>,
    url: String,
}

impl DeepgramTTS {
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_url(api_key, DEEPGRAM_TTS_URL)
    }

    pub fn with_url(api_key: Option<String>, url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            url: url.into(),
        }
    }

    fn build_url(&self, options: &SynthesisOptions) -> Result<Url, SynthesisError> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| SynthesisError::InvalidRequest(format!("Invalid speak URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("model", &options.voice)
            .append_pair("encoding", &options.encoding)
            .append_pair("sample_rate", &options.sample_rate.to_string());
        if options.encoding == "linear16" {
            // Raw PCM without a WAV header so chunks can be played as they arrive
            url.query_pairs_mut().append_pair("container", "none");
        }
        Ok(url)
    }
}

fn status_error(status: StatusCode, body: String) -> SynthesisError {
    let detail = format!("Deepgram speak returned {status}: {body}");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SynthesisError::Authentication(detail),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            SynthesisError::InvalidRequest(detail)
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => SynthesisError::Timeout(detail),
        _ => SynthesisError::Provider(detail),
    }
}

#[async_trait]
impl SpeechSynthesizer for DeepgramTTS {
    async fn synthesize(
        &self,
        text: &str,
        options: &SynthesisOptions,
    ) -> Result<AudioStream, SynthesisError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            SynthesisError::Authentication("DEEPGRAM_API_KEY is not configured".to_string())
        })?;
        if text.trim().is_empty() {
            return Err(SynthesisError::InvalidRequest("text is empty".to_string()));
        }

        let url = self.build_url(options)?;
        debug!(voice = %options.voice, chars = text.len(), "Requesting speech synthesis");

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Token {api_key}"))
            .json(&json!({ "text": text }))
            .send()
            .await
            .map_err(SynthesisError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "Speech synthesis rejected");
            return Err(status_error(status, body));
        }

        Ok(Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(SynthesisError::from_reqwest)),
        ))
    }

    fn name(&self) -> &'static str {
        "deepgram"
    }
}
