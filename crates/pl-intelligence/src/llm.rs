//! LLM provider abstraction.
//!
//! One request shape ([`LlmMessage`] + [`LlmConfig`]), one response shape
//! ([`LlmResponse`]), and a [`LlmProvider`] trait object over the
//! concrete backends. The code agent and the reviewer only ever see the
//! trait, which is what makes them testable: [`MockProvider`] queues
//! scripted responses and records every request it sees.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Generation can legitimately take minutes for a large patch.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    HttpError(String),

    #[error("api error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("rate limited{}", .retry_after_secs.map(|s| format!(", retry after {s}s")).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("failed to parse provider response: {0}")]
    ParseError(String),

    #[error("request timed out")]
    Timeout,

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::HttpError(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmRole {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for LlmRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LlmRole::System => "system",
            LlmRole::User => "user",
            LlmRole::Assistant => "assistant",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 16384,
            temperature: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub finish_reason: Option<String>,
}

impl LlmResponse {
    /// A canned response for tests and for the mock's fallback.
    pub fn mock(content: impl Into<String>) -> Self {
        let content = content.into();
        let output_tokens = (content.len() / 4) as u64;
        Self {
            content,
            model: "mock".to_string(),
            input_tokens: 0,
            output_tokens,
            finish_reason: Some("stop".to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        messages: &[LlmMessage],
        config: &LlmConfig,
    ) -> Result<LlmResponse, LlmError>;

    fn name(&self) -> &'static str;
}

impl std::fmt::Debug for dyn LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmProvider")
            .field("name", &self.name())
            .finish()
    }
}

/// Construct a provider by its config name.
pub fn provider_for(name: &str, api_key: String) -> Result<Box<dyn LlmProvider>, LlmError> {
    match name {
        "anthropic" => Ok(Box::new(AnthropicProvider::new(api_key))),
        "openai" => Ok(Box::new(OpenAiProvider::new(api_key))),
        other => Err(LlmError::Unsupported(format!("llm provider '{other}'"))),
    }
}

// ---------------------------------------------------------------------------
// Anthropic
// ---------------------------------------------------------------------------

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: ANTHROPIC_API_URL.to_string(),
        }
    }

    /// Point the provider at a different endpoint (proxies, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Build the JSON request body. Public so tests can assert the exact
    /// wire shape without a network. System messages move to the
    /// top-level `system` field, as the messages API requires.
    pub fn build_request_body(messages: &[LlmMessage], config: &LlmConfig) -> serde_json::Value {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == LlmRole::System)
            .map(|m| m.content.as_str())
            .collect();
        let chat: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != LlmRole::System)
            .map(|m| {
                serde_json::json!({
                    "role": m.role.to_string(),
                    "content": m.content,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": config.model,
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "messages": chat,
        });
        if !system.is_empty() {
            body["system"] = serde_json::Value::String(system.join("\n\n"));
        }
        body
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(
        &self,
        messages: &[LlmMessage],
        config: &LlmConfig,
    ) -> Result<LlmResponse, LlmError> {
        let body = Self::build_request_body(messages, config);
        let response = self
            .client
            .post(&self.base_url)
            .timeout(REQUEST_TIMEOUT)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(LlmError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;
        let content = parsed
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        tracing::debug!(
            model = %parsed.model,
            input_tokens = parsed.usage.input_tokens,
            output_tokens = parsed.usage.output_tokens,
            stop_reason = ?parsed.stop_reason,
            "anthropic completion received"
        );

        Ok(LlmResponse {
            content,
            model: parsed.model,
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
            finish_reason: parsed.stop_reason,
        })
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    model: String,
    usage: AnthropicUsage,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

// ---------------------------------------------------------------------------
// OpenAI
// ---------------------------------------------------------------------------

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: OPENAI_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Build the JSON request body. System messages stay inline; the chat
    /// completions API takes them as ordinary messages.
    pub fn build_request_body(messages: &[LlmMessage], config: &LlmConfig) -> serde_json::Value {
        let chat: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": m.role.to_string(),
                    "content": m.content,
                })
            })
            .collect();
        serde_json::json!({
            "model": config.model,
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "messages": chat,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(
        &self,
        messages: &[LlmMessage],
        config: &LlmConfig,
    ) -> Result<LlmResponse, LlmError> {
        let body = Self::build_request_body(messages, config);
        let response = self
            .client
            .post(&self.base_url)
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(LlmError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;
        let first = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::ParseError("response has no choices".to_string()))?;

        tracing::debug!(
            model = %parsed.model,
            input_tokens = parsed.usage.prompt_tokens,
            output_tokens = parsed.usage.completion_tokens,
            "openai completion received"
        );

        Ok(LlmResponse {
            content: first.message.content.unwrap_or_default(),
            model: parsed.model,
            input_tokens: parsed.usage.prompt_tokens,
            output_tokens: parsed.usage.completion_tokens,
            finish_reason: first.finish_reason,
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    model: String,
    #[serde(default)]
    usage: OpenAiUsage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

// ---------------------------------------------------------------------------
// Mock
// ---------------------------------------------------------------------------

/// Scriptable provider for tests: queued responses come back in order,
/// every request is captured for later assertions, and an exhausted queue
/// falls back to a canned response.
#[derive(Clone, Default)]
pub struct MockProvider {
    responses: Arc<Mutex<VecDeque<Result<LlmResponse, LlmError>>>>,
    captured: Arc<Mutex<Vec<(Vec<LlmMessage>, LlmConfig)>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, content: impl Into<String>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(LlmResponse::mock(content)));
        self
    }

    pub fn with_error(self, error: LlmError) -> Self {
        self.responses.lock().unwrap().push_back(Err(error));
        self
    }

    /// Every `(messages, config)` pair this mock has served, in order.
    pub fn captured_requests(&self) -> Vec<(Vec<LlmMessage>, LlmConfig)> {
        self.captured.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn complete(
        &self,
        messages: &[LlmMessage],
        config: &LlmConfig,
    ) -> Result<LlmResponse, LlmError> {
        self.captured
            .lock()
            .unwrap()
            .push((messages.to_vec(), config.clone()));
        match self.responses.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(LlmResponse::mock("mock response")),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// Usage tracking
// ---------------------------------------------------------------------------

/// Running token totals across one invocation, for the final log line.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LlmUsageTracker {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_requests: u64,
}

impl LlmUsageTracker {
    pub fn record(&mut self, response: &LlmResponse) {
        self.total_input_tokens += response.input_tokens;
        self.total_output_tokens += response.output_tokens;
        self.total_requests += 1;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_messages() -> Vec<LlmMessage> {
        vec![
            LlmMessage::system("you are terse"),
            LlmMessage::user("say hi"),
        ]
    }

    #[test]
    fn anthropic_body_hoists_system_messages() {
        let body = AnthropicProvider::build_request_body(&make_messages(), &LlmConfig::default());
        assert_eq!(body["system"], "you are terse");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"], "say hi");
        assert_eq!(body["max_tokens"], 16384);
    }

    #[test]
    fn anthropic_body_omits_system_when_absent() {
        let body = AnthropicProvider::build_request_body(
            &[LlmMessage::user("hi")],
            &LlmConfig::default(),
        );
        assert!(body.get("system").is_none());
    }

    #[test]
    fn anthropic_body_joins_multiple_system_messages() {
        let messages = vec![
            LlmMessage::system("one"),
            LlmMessage::system("two"),
            LlmMessage::user("go"),
        ];
        let body = AnthropicProvider::build_request_body(&messages, &LlmConfig::default());
        assert_eq!(body["system"], "one\n\ntwo");
    }

    #[test]
    fn openai_body_keeps_system_inline() {
        let body = OpenAiProvider::build_request_body(&make_messages(), &LlmConfig::default());
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
    }

    #[test]
    fn anthropic_response_parses() {
        let raw = r#"{
            "content": [{"type": "text", "text": "hello"}, {"type": "text", "text": " there"}],
            "model": "claude-sonnet-4-20250514",
            "usage": {"input_tokens": 10, "output_tokens": 5},
            "stop_reason": "end_turn"
        }"#;
        let parsed: AnthropicResponse = serde_json::from_str(raw).unwrap();
        let text: String = parsed
            .content
            .iter()
            .filter_map(|b| b.text.as_deref())
            .collect();
        assert_eq!(text, "hello there");
        assert_eq!(parsed.usage.input_tokens, 10);
    }

    #[test]
    fn openai_response_parses() {
        let raw = r#"{
            "choices": [{"message": {"content": "hi"}, "finish_reason": "stop"}],
            "model": "gpt-4o",
            "usage": {"prompt_tokens": 7, "completion_tokens": 2}
        }"#;
        let parsed: OpenAiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("hi"));
        assert_eq!(parsed.usage.completion_tokens, 2);
    }

    #[tokio::test]
    async fn mock_returns_queued_responses_in_order() {
        let mock = MockProvider::new()
            .with_response("first")
            .with_response("second");
        let config = LlmConfig::default();
        let a = mock.complete(&[LlmMessage::user("1")], &config).await.unwrap();
        let b = mock.complete(&[LlmMessage::user("2")], &config).await.unwrap();
        assert_eq!(a.content, "first");
        assert_eq!(b.content, "second");
        assert_eq!(mock.remaining(), 0);
    }

    #[tokio::test]
    async fn mock_captures_requests() {
        let mock = MockProvider::new().with_response("ok");
        let config = LlmConfig {
            model: "test-model".to_string(),
            ..LlmConfig::default()
        };
        mock.complete(&make_messages(), &config).await.unwrap();
        let captured = mock.captured_requests();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].0.len(), 2);
        assert_eq!(captured[0].1.model, "test-model");
    }

    #[tokio::test]
    async fn mock_returns_queued_errors() {
        let mock = MockProvider::new().with_error(LlmError::Timeout);
        let err = mock
            .complete(&[LlmMessage::user("x")], &LlmConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Timeout));
    }

    #[tokio::test]
    async fn mock_falls_back_when_exhausted() {
        let mock = MockProvider::new();
        let response = mock
            .complete(&[LlmMessage::user("x")], &LlmConfig::default())
            .await
            .unwrap();
        assert_eq!(response.content, "mock response");
    }

    #[test]
    fn provider_factory_rejects_unknown_names() {
        assert!(provider_for("anthropic", "k".into()).is_ok());
        assert!(provider_for("openai", "k".into()).is_ok());
        let err = provider_for("smoke-signals", "k".into()).unwrap_err();
        assert!(err.to_string().contains("smoke-signals"));
    }

    #[test]
    fn usage_tracker_accumulates() {
        let mut tracker = LlmUsageTracker::default();
        let mut response = LlmResponse::mock("abcdefgh");
        response.input_tokens = 100;
        response.output_tokens = 50;
        tracker.record(&response);
        tracker.record(&response);
        assert_eq!(tracker.total_input_tokens, 200);
        assert_eq!(tracker.total_output_tokens, 100);
        assert_eq!(tracker.total_requests, 2);
    }

    #[test]
    fn error_display_includes_detail() {
        let err = LlmError::ApiError {
            status: 500,
            message: "overloaded".to_string(),
        };
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("overloaded"));

        let limited = LlmError::RateLimited {
            retry_after_secs: Some(30),
        };
        assert!(limited.to_string().contains("30"));

        let unknown = LlmError::RateLimited {
            retry_after_secs: None,
        };
        assert_eq!(unknown.to_string(), "rate limited");
    }

    #[test]
    fn trait_object_is_usable() {
        let provider: Box<dyn LlmProvider> = Box::new(MockProvider::new());
        assert_eq!(provider.name(), "mock");
    }
}
