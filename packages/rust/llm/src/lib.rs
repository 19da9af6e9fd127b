//! Chat-completion capability used for query generation, summarization, and synthesis.
//!
//! The pipeline only depends on the [`ChatModel`] trait. [`OpenAiChatClient`]
//! implements it against any OpenAI-compatible `/chat/completions` endpoint.
//! [`reply`] holds the parsing helpers for the free-text replies.

pub mod reply;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use researchbrief_shared::{LlmConfig, validate_api_key};

pub use reply::{extract_json_block, parse_bullets};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure of a chat-completion call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlmError {
    /// The capability is not configured or could not be reached at all.
    #[error("language model unavailable: {0}")]
    Unavailable(String),

    #[error("language model timed out")]
    Timeout,

    #[error("language model returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("could not decode language model reply: {0}")]
    Decode(String),

    #[error("language model returned an empty reply")]
    EmptyReply,
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A single completion request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ChatRequest {
    /// System + user prompt pair, the shape every pipeline call uses.
    pub fn prompt(
        model: impl Into<String>,
        system: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            temperature: 0.3,
            max_tokens: 400,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A text-in, text-out language model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run one completion and return the assistant's text.
    async fn complete(&self, request: ChatRequest) -> Result<String, LlmError>;
}

/// Stand-in used when no model is configured; every call fails with
/// [`LlmError::Unavailable`] so callers take their fallback paths.
#[derive(Debug, Clone)]
pub struct UnavailableChatModel {
    reason: String,
}

impl UnavailableChatModel {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ChatModel for UnavailableChatModel {
    async fn complete(&self, _request: ChatRequest) -> Result<String, LlmError> {
        Err(LlmError::Unavailable(self.reason.clone()))
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible client
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// [`ChatModel`] over an OpenAI-compatible HTTP API.
#[derive(Debug, Clone)]
pub struct OpenAiChatClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl OpenAiChatClient {
    /// Build a client for `base_url` with an explicit key.
    pub fn new(base_url: &str, api_key: impl Into<String>, timeout: Duration) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
        })
    }

    /// Build a client from the `[llm]` section, reading the key from its env var.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = validate_api_key(&config.api_key_env, "Language model")
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;
        Self::new(
            &config.base_url,
            api_key,
            Duration::from_secs(config.timeout_secs.max(1)),
        )
    }
}

#[async_trait]
impl ChatModel for OpenAiChatClient {
    #[instrument(skip_all, fields(model = %request.model))]
    async fn complete(&self, request: ChatRequest) -> Result<String, LlmError> {
        let started = Instant::now();

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Http {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let parsed: CompletionResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::Decode(e.to_string())
            }
        })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(LlmError::EmptyReply)?;

        debug!(
            reply_len = text.len(),
            latency_ms = started.elapsed().as_millis(),
            "completion received"
        );

        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> OpenAiChatClient {
        OpenAiChatClient::new(&format!("{}/v1", server.uri()), "test-key", Duration::from_secs(5))
            .unwrap()
    }

    #[test]
    fn request_serializes_in_openai_shape() {
        let req = ChatRequest::prompt("gpt-4o-mini", "be terse", "hello").temperature(0.7);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hello");
        assert_eq!(json["max_tokens"], 400);
    }

    #[tokio::test]
    async fn complete_returns_first_choice() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({"model": "gpt-4o"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "  • one\n• two  "}}]
            })))
            .mount(&server)
            .await;

        let text = client_for(&server)
            .complete(ChatRequest::prompt("gpt-4o", "sys", "user"))
            .await
            .unwrap();
        assert_eq!(text, "• one\n• two");
    }

    #[tokio::test]
    async fn http_error_is_reported_with_status() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .complete(ChatRequest::prompt("gpt-4o", "sys", "user"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LlmError::Http {
                status: 429,
                body: "rate limited".into()
            }
        );
    }

    #[tokio::test]
    async fn empty_choices_is_empty_reply() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .complete(ChatRequest::prompt("gpt-4o", "sys", "user"))
            .await
            .unwrap_err();
        assert_eq!(err, LlmError::EmptyReply);
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(3))
                    .set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let client = OpenAiChatClient::new(&server.uri(), "k", Duration::from_millis(200)).unwrap();
        let err = client
            .complete(ChatRequest::prompt("gpt-4o", "sys", "user"))
            .await
            .unwrap_err();
        assert_eq!(err, LlmError::Timeout);
    }

    #[tokio::test]
    async fn unavailable_model_always_fails() {
        let model = UnavailableChatModel::new("OPENAI_API_KEY not set");
        let err = model
            .complete(ChatRequest::prompt("gpt-4o", "sys", "user"))
            .await
            .unwrap_err();
        assert_eq!(err, LlmError::Unavailable("OPENAI_API_KEY not set".into()));
    }

    #[test]
    fn missing_key_is_unavailable() {
        let config = LlmConfig {
            api_key_env: "RB_TEST_MISSING_LLM_KEY_987".into(),
            ..LlmConfig::default()
        };
        let err = OpenAiChatClient::from_config(&config).unwrap_err();
        assert!(matches!(err, LlmError::Unavailable(_)));
    }
}
