//! LLM client adapter. Wraps an OpenAI-compatible chat completion endpoint behind the
//! `CompletionBackend` trait and adds the retry policy shared by every benchmark run.
//!
//! Transient failures (HTTP 429, 5xx, network errors and timeouts) are retried with exponential
//! backoff. Everything else is returned to the caller on the first attempt.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Upper bound for a single backoff delay.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// How much of an error body is kept in error messages.
const ERROR_BODY_LIMIT: usize = 500;

/// API Key wrapper that hides the key in debug output.
#[derive(Clone, Deserialize)]
pub struct ApiKey(pub String);

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("********")
    }
}

/// Configuration for the LLM client, read from the `[llm]` config section.
#[derive(Debug, Deserialize)]
pub struct LLMConfig {
    /// Base URL of the OpenAI-compatible API. Example: "https://openrouter.ai/api/v1"
    pub address: String,

    /// API Key for the LLM service.
    pub api_key: Option<ApiKey>,

    /// Name of the model to invoke.
    pub model: String,

    /// Maximum output tokens.
    pub max_tokens: u32,

    pub temperature: f32,

    /// Timeout for a single request, in seconds.
    pub timeout_secs: u64,

    /// How many times a transient failure is retried.
    pub max_retries: u32,

    /// First backoff delay, doubled on every retry.
    pub backoff_base_ms: u64,

    // Fields that the config contains but we don't recognize.
    #[serde(flatten)]
    pub unknown: HashMap<String, Value>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Body of a chat completion request.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Generated text plus the provider-reported usage.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Completion {
    pub content: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

/// Failure of a single completion attempt.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum BackendError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("malformed response: {0}")]
    Decode(String),
}

impl BackendError {
    /// Whether sending the same request again may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            BackendError::Network(_) | BackendError::Timeout(_) => true,
            BackendError::InvalidRequest(_) | BackendError::Decode(_) => false,
        }
    }
}

/// A chat completion endpoint.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError>;
}

/// Assembled prompt, ready to send.
#[derive(Clone, Debug, PartialEq)]
pub struct PromptPayload {
    pub system_text: String,
    pub user_text: String,
    /// chars / 4, rounded up.
    pub estimated_tokens: usize,
    /// The context section was cut to fit the token budget.
    pub truncated: bool,
}

/// Outcome of a successful `LlmClient::send`.
#[derive(Clone, Debug, PartialEq)]
pub struct LlmResult {
    pub raw_response_text: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    /// Wall-clock time of the attempt that succeeded.
    pub latency_seconds: f64,
    pub model_id: String,
    /// Transient failures retried before the success.
    pub retries: u32,
}

#[derive(Debug, Error, PartialEq)]
#[error("LLM request failed after {attempts} attempt(s): {reason}")]
pub struct LlmRequestError {
    pub reason: String,
    /// The last failure was transient; retries were exhausted.
    pub transient: bool,
    pub attempts: u32,
}

impl LlmRequestError {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

#[derive(Debug, Error)]
pub enum LlmBuildError {
    #[error("no API key configured (set OPENROUTER_API_KEY or llm.api_key)")]
    MissingApiKey,
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Retry and timeout settings for `LlmClient`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &LLMConfig) -> Self {
        RetryPolicy {
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            attempt_timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.backoff_base.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// The adapter every pipeline stage talks to. Cheap to share behind an `Arc`; the only state is
/// the backend's connection pool.
pub struct LlmClient {
    backend: Arc<dyn CompletionBackend>,
    model: String,
    max_tokens: u32,
    temperature: f32,
    policy: RetryPolicy,
}

impl LlmClient {
    pub fn new(backend: Arc<dyn CompletionBackend>, config: &LLMConfig) -> Self {
        LlmClient {
            backend,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            policy: RetryPolicy::from_config(config),
        }
    }

    /// Builds a client talking to the configured HTTP endpoint.
    pub fn from_config(config: &LLMConfig) -> Result<Self, LlmBuildError> {
        let api_key = match config.api_key {
            Some(ref key) if !key.0.is_empty() => key.clone(),
            _ => return Err(LlmBuildError::MissingApiKey),
        };
        let backend = OpenAiCompatBackend::new(
            &config.address,
            api_key,
            Duration::from_secs(config.timeout_secs),
        )?;
        Ok(Self::new(Arc::new(backend), config))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Sends `payload`, retrying transient failures.
    pub async fn send(&self, payload: &PromptPayload) -> Result<LlmResult, LlmRequestError> {
        let mut messages = Vec::with_capacity(2);
        if !payload.system_text.is_empty() {
            messages.push(ChatMessage::system(&payload.system_text));
        }
        messages.push(ChatMessage::user(&payload.user_text));
        let request = CompletionRequest {
            model: self.model.clone(),
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let mut retries = 0;
        loop {
            debug!(
                "Sending completion request to {} (attempt {})",
                self.model,
                retries + 1
            );
            let started = Instant::now();
            let limit = self.policy.attempt_timeout;
            let attempt = match tokio::time::timeout(limit, self.backend.complete(&request)).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout(limit)),
            };
            match attempt {
                Ok(completion) => {
                    return Ok(LlmResult {
                        raw_response_text: completion.content,
                        tokens_in: completion.tokens_in,
                        tokens_out: completion.tokens_out,
                        latency_seconds: started.elapsed().as_secs_f64(),
                        model_id: self.model.clone(),
                        retries,
                    });
                }
                Err(e) if e.is_transient() && retries < self.policy.max_retries => {
                    let delay = self.policy.backoff(retries);
                    warn!("Transient LLM failure ({e}); retrying in {delay:?}");
                    retries += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(LlmRequestError {
                        reason: e.to_string(),
                        transient: e.is_transient(),
                        attempts: retries + 1,
                    });
                }
            }
        }
    }

    /// Sends a tiny prompt to verify the endpoint, key and model are usable.
    pub async fn check_connection(&self) -> Result<LlmResult, LlmRequestError> {
        let payload = PromptPayload {
            system_text: String::new(),
            user_text: "Reply with the single word OK.".into(),
            estimated_tokens: 8,
            truncated: false,
        };
        self.send(&payload).await
    }
}

/// `CompletionBackend` for any OpenAI-compatible `/chat/completions` endpoint (OpenRouter,
/// OpenAI, a local Ollama, ...).
pub struct OpenAiCompatBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: ApiKey,
    timeout: Duration,
}

impl OpenAiCompatBackend {
    pub fn new(address: &str, api_key: ApiKey, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(OpenAiCompatBackend {
            client,
            endpoint: format!("{}/chat/completions", address.trim_end_matches('/')),
            api_key,
            timeout,
        })
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    /// Some gateways report upstream failures inside a 200 response.
    #[serde(default)]
    error: Option<ProviderError>,
}

#[derive(Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct ProviderError {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: String,
}

fn classify_reqwest(e: reqwest::Error, timeout: Duration) -> BackendError {
    if e.is_builder() {
        BackendError::InvalidRequest(e.to_string())
    } else if e.is_timeout() {
        BackendError::Timeout(timeout)
    } else if e.is_decode() {
        BackendError::Decode(e.to_string())
    } else {
        BackendError::Network(e.to_string())
    }
}

fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

/// Turns a decoded response body into a `Completion`.
fn parse_completion(response: ChatCompletionResponse) -> Result<Completion, BackendError> {
    if let Some(error) = response.error {
        return Err(BackendError::Status {
            status: error.code.unwrap_or(502),
            body: truncate_body(&error.message),
        });
    }
    let content = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::Decode("no choices in response".into()))?
        .message
        .content
        .unwrap_or_default();
    let (tokens_in, tokens_out) = response
        .usage
        .map(|u| (u.prompt_tokens, u.completion_tokens))
        .unwrap_or((0, 0));
    Ok(Completion {
        content,
        tokens_in,
        tokens_out,
    })
}

#[async_trait]
impl CompletionBackend for OpenAiCompatBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
        let timeout = self.timeout;
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key.0)
            .json(request)
            .send()
            .await
            .map_err(|e| classify_reqwest(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| classify_reqwest(e, timeout))?;
        parse_completion(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::MockBackend;

    fn config() -> LLMConfig {
        LLMConfig {
            address: "http://localhost".into(),
            api_key: Some(ApiKey("secret".into())),
            model: "mock-model".into(),
            max_tokens: 256,
            temperature: 0.1,
            timeout_secs: 5,
            max_retries: 3,
            backoff_base_ms: 1,
            unknown: HashMap::new(),
        }
    }

    fn payload() -> PromptPayload {
        PromptPayload {
            system_text: "system".into(),
            user_text: "user".into(),
            estimated_tokens: 3,
            truncated: false,
        }
    }

    fn status(code: u16) -> BackendError {
        BackendError::Status {
            status: code,
            body: String::new(),
        }
    }

    #[test]
    fn classification() {
        assert!(status(429).is_transient());
        assert!(status(503).is_transient());
        assert!(!status(401).is_transient());
        assert!(!status(400).is_transient());
        assert!(BackendError::Network("reset".into()).is_transient());
        assert!(!BackendError::Decode("bad json".into()).is_transient());
    }

    #[test]
    fn backoff_doubles_and_is_capped() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            attempt_timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(2000));
        assert_eq!(policy.backoff(20), MAX_BACKOFF);
    }

    #[test]
    fn api_key_is_hidden() {
        assert_eq!(format!("{:?}", ApiKey("sk-123".into())), "********");
    }

    #[test]
    fn missing_key_is_rejected() {
        let mut config = config();
        config.api_key = None;
        assert!(matches!(
            LlmClient::from_config(&config),
            Err(LlmBuildError::MissingApiKey)
        ));
    }

    #[tokio::test]
    async fn three_transient_failures_then_success() {
        let backend = Arc::new(
            MockBackend::new()
                .then_err(status(429))
                .then_err(status(502))
                .then_err(BackendError::Network("connection reset".into()))
                .then_ok("fixed", 120, 30),
        );
        let client = LlmClient::new(backend.clone(), &config());
        let result = client.send(&payload()).await.unwrap();
        assert_eq!(result.raw_response_text, "fixed");
        assert_eq!(result.retries, 3);
        assert_eq!(result.tokens_in, 120);
        assert_eq!(result.tokens_out, 30);
        assert_eq!(backend.calls(), 4);
    }

    #[tokio::test]
    async fn non_transient_failure_is_not_retried() {
        let backend = Arc::new(MockBackend::new().then_err(status(401)).then_ok("unused", 1, 1));
        let client = LlmClient::new(backend.clone(), &config());
        let err = client.send(&payload()).await.unwrap_err();
        assert!(!err.transient);
        assert_eq!(err.retries(), 0);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn retries_are_capped() {
        let backend = Arc::new(
            MockBackend::new()
                .then_err(status(500))
                .then_err(status(500))
                .then_err(status(500))
                .then_err(status(500))
                .then_ok("too late", 1, 1),
        );
        let client = LlmClient::new(backend.clone(), &config());
        let err = client.send(&payload()).await.unwrap_err();
        assert!(err.transient);
        assert_eq!(err.attempts, 4);
        assert_eq!(backend.calls(), 4);
    }

    #[tokio::test]
    async fn request_carries_messages_and_limits() {
        let backend = Arc::new(MockBackend::new().then_ok("ok", 1, 1));
        let client = LlmClient::new(backend.clone(), &config());
        client.send(&payload()).await.unwrap();
        let request = backend.last_request().unwrap();
        assert_eq!(request.model, "mock-model");
        assert_eq!(request.max_tokens, 256);
        assert_eq!(
            request.messages,
            vec![ChatMessage::system("system"), ChatMessage::user("user")]
        );
    }

    #[test]
    fn provider_payloads_are_parsed() {
        let ok: ChatCompletionResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":"hello"}}],
                "usage":{"prompt_tokens":10,"completion_tokens":2}}"#,
        )
        .unwrap();
        assert_eq!(
            parse_completion(ok).unwrap(),
            Completion {
                content: "hello".into(),
                tokens_in: 10,
                tokens_out: 2
            }
        );

        let embedded: ChatCompletionResponse =
            serde_json::from_str(r#"{"error":{"code":429,"message":"rate limited"}}"#).unwrap();
        let err = parse_completion(embedded).unwrap_err();
        assert!(err.is_transient());

        let empty: ChatCompletionResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(
            parse_completion(empty),
            Err(BackendError::Decode(_))
        ));
    }
}
