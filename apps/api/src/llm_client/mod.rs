/// LLM Client: the single point of entry for all model calls in the panel service.
///
/// ARCHITECTURAL RULE: No other module may call the Anthropic API directly.
/// Callers go through an `LlmProvider` and the retry/timeout policy in `policy`.
///
/// Model: claude-sonnet-4-5 (hardcoded, not configurable per request)
use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[cfg(test)]
pub mod fake;
pub mod policy;
pub mod pool;
pub mod prompts;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// The model used for all LLM calls.
/// This is intentionally hardcoded to prevent accidental drift.
pub const MODEL: &str = "claude-sonnet-4-5";
const MAX_TOKENS: u32 = 4096;
/// Hard ceiling on the HTTP request; the call policy enforces the real per-call timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Failure class of an external call, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    RateLimited,
    /// Provider overloaded, 5xx or unreachable.
    Unavailable,
    /// The request or the response was unusable; retrying will not help.
    Invalid,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Invalid => "invalid",
        })
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("LLM call timed out after {0:?}")]
    Timeout(Duration),

    #[error("LLM call cancelled")]
    Cancelled,
}

impl LlmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LlmError::Http(e) if e.is_timeout() => ErrorKind::Timeout,
            LlmError::Http(_) => ErrorKind::Unavailable,
            LlmError::Api { status: 429, .. } => ErrorKind::RateLimited,
            LlmError::Api { status, .. } if *status >= 500 => ErrorKind::Unavailable,
            LlmError::Api { .. } => ErrorKind::Invalid,
            LlmError::Parse(_) | LlmError::EmptyContent => ErrorKind::Invalid,
            LlmError::Timeout(_) | LlmError::Cancelled => ErrorKind::Timeout,
        }
    }

    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, LlmError::Cancelled)
            && matches!(
                self.kind(),
                ErrorKind::Timeout | ErrorKind::RateLimited | ErrorKind::Unavailable
            )
    }
}

/// A single model call: the persona/moderator voice, the material it works
/// from, and what it is asked to do.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub context: String,
    pub question: String,
}

impl CompletionRequest {
    pub fn new(
        system_prompt: impl Into<String>,
        context: impl Into<String>,
        question: impl Into<String>,
    ) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            context: context.into(),
            question: question.into(),
        }
    }

    /// The user message as sent to the provider.
    pub fn user_message(&self) -> String {
        format!("{}\n\n{}", self.context.trim_end(), self.question.trim())
    }

    /// The exact prompt text of this call (system + user), kept for auditing.
    pub fn render(&self) -> String {
        format!(
            "[SYSTEM]\n{}\n\n[USER]\n{}",
            self.system_prompt.trim(),
            self.user_message()
        )
    }
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub duration: Duration,
}

/// Black-box text completion capability. `AppState` holds an `Arc<dyn LlmProvider>`.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// One attempt, no retries. Retries belong to `policy::call_with_policy`.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError>;
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: TokenUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct TokenUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl MessagesResponse {
    /// All text blocks joined; `None` when there is no non-blank text.
    fn into_text(self) -> Option<String> {
        let text: String = self
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Anthropic Messages API client.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
}

impl LlmClient {
    pub fn new(api_key: String) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder().timeout(HTTP_TIMEOUT).build()?,
            api_key,
        })
    }
}

#[async_trait]
impl LlmProvider for LlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let user_message = request.user_message();
        let request_body = AnthropicRequest {
            model: MODEL,
            max_tokens: MAX_TOKENS,
            system: &request.system_prompt,
            messages: vec![AnthropicMessage {
                role: "user",
                content: &user_message,
            }],
        };

        let started = Instant::now();
        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ErrorEnvelope>(&body) {
                Ok(envelope) => envelope.error.message,
                Err(_) => body,
            };
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: MessagesResponse = response.json().await?;
        let duration = started.elapsed();
        debug!(
            "LLM call took {}ms ({} tokens in, {} out)",
            duration.as_millis(),
            body.usage.input_tokens,
            body.usage.output_tokens
        );

        let text = body.into_text().ok_or(LlmError::EmptyContent)?;
        Ok(Completion { text, duration })
    }
}

/// Removes a surrounding markdown code fence (with or without a `json` tag).
pub fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(body) = text.strip_prefix("```") else {
        return text;
    };
    let body = body.strip_prefix("json").unwrap_or(body);
    body.strip_suffix("```").unwrap_or(body).trim()
}
