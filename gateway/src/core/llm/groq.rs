//! Groq chat completions through the OpenAI-compatible endpoint.

use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::base::{AiResponse, GenerationError, GenerationRequest, ResponseGenerator, ResponseMetadata};
use super::prompt::{SYSTEM_PROMPT, render_user_prompt};

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_GROQ_MODEL: &str = "llama-3.3-70b-versatile";
pub const RESPONSE_KIND: &str = "fitness_response";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct GroqConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for GroqConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: GROQ_BASE_URL.to_string(),
            model: DEFAULT_GROQ_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: Some(512),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

pub struct GroqResponseGenerator {
    client: reqwest::Client,
    config: GroqConfig,
}

impl GroqResponseGenerator {
    pub fn new(config: GroqConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, config }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

fn status_error(status: StatusCode, body: String) -> GenerationError {
    let detail = format!("chat completion returned {status}: {body}");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GenerationError::Authentication(detail),
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
            GenerationError::InvalidRequest(detail)
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => GenerationError::Timeout(detail),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => GenerationError::Network(detail),
        _ => GenerationError::Provider(detail),
    }
}

#[async_trait]
impl ResponseGenerator for GroqResponseGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<AiResponse, GenerationError> {
        let api_key = self.config.api_key.as_deref().ok_or_else(|| {
            GenerationError::Authentication("GROQ_API_KEY is not configured".to_string())
        })?;

        let user_prompt = render_user_prompt(request);
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &user_prompt,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        debug!(model = %self.config.model, "Requesting chat completion");
        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(GenerationError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "Chat completion rejected");
            return Err(status_error(status, body));
        }

        let completion: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Provider(format!("Invalid completion body: {e}")))?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| GenerationError::Provider("Completion had no content".to_string()))?;

        Ok(AiResponse {
            text,
            metadata: ResponseMetadata {
                model: completion.model.unwrap_or_else(|| self.config.model.clone()),
                kind: RESPONSE_KIND.to_string(),
            },
        })
    }

    fn name(&self) -> &'static str {
        "groq"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::recovery::Classify;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn generator(server: &MockServer) -> GroqResponseGenerator {
        GroqResponseGenerator::new(GroqConfig {
            api_key: Some("groq-key".to_string()),
            base_url: format!("{}/openai/v1", server.uri()),
            ..Default::default()
        })
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            user_context: "Fitness level: beginner, Goals: strength".into(),
            training_history: "No previous history".into(),
            conversation_history: String::new(),
            user_input: "¿Cómo entreno piernas?".into(),
            language: "es".into(),
        }
    }

    #[tokio::test]
    async fn test_generate_returns_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/v1/chat/completions"))
            .and(header("Authorization", "Bearer groq-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "llama-3.3-70b-versatile",
                "choices": [{"message": {"role": "assistant", "content": " Empieza con sentadillas. "}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = generator(&server).generate(&request()).await.unwrap();
        assert_eq!(response.text, "Empieza con sentadillas.");
        assert_eq!(response.metadata.kind, RESPONSE_KIND);
        assert_eq!(response.metadata.model, "llama-3.3-70b-versatile");

        let received: Vec<Request> = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
        assert_eq!(body["messages"][0]["role"], "system");
        assert!(
            body["messages"][1]["content"]
                .as_str()
                .unwrap()
                .contains("¿Cómo entreno piernas?")
        );
    }

    #[tokio::test]
    async fn test_status_errors_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let error = generator(&server).generate(&request()).await.unwrap_err();
        assert!(error.is_retryable());

        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, String::new()),
            GenerationError::Authentication(_)
        ));
    }

    #[tokio::test]
    async fn test_empty_completion_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let error = generator(&server).generate(&request()).await.unwrap_err();
        assert!(matches!(error, GenerationError::Provider(_)));
    }

    #[tokio::test]
    async fn test_missing_key() {
        let generator = GroqResponseGenerator::new(GroqConfig::default());
        assert!(matches!(
            generator.generate(&request()).await,
            Err(GenerationError::Authentication(_))
        ));
    }
}
