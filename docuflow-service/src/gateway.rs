//! AI gateway.
//!
//! Wraps a [`CompletionBackend`] with request shaping per [`GatewayMode`],
//! a per-attempt timeout, and bounded retry with exponential backoff for
//! transient failures. Responses are never cached.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::config::AiConfig;
use crate::error::GatewayError;

/// A single prompt as sent to the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
}

/// Backend failure classification, as reported by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendFailure {
    /// Network failures, timeouts, server errors
    Transient(String),
    /// The service refused the request; retrying would not help
    Rejected { status: u16, message: String },
    /// The service answered with something that is not usable text
    Malformed(String),
}

/// Text-completion capability behind the gateway
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, BackendFailure>;

    async fn health_check(&self) -> bool {
        true
    }
}

/// Shapes the instruction sent alongside a prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayMode {
    Translate { target_language: String },
    Summarize { length_hint: Option<String> },
    Transliterate { target_script: String },
    Answer,
}

/// Reply the model is told to give when the context does not contain an answer
pub const NO_ANSWER_SENTINEL: &str = "NO_ANSWER";

impl GatewayMode {
    fn system_instruction(&self) -> String {
        match self {
            GatewayMode::Translate { target_language } => format!(
                "You are a translation engine. Translate the user's text into {target_language}. \
                 Preserve paragraph breaks and table rows. Reply with the translation only."
            ),
            GatewayMode::Summarize { length_hint } => {
                let style = length_hint
                    .as_deref()
                    .unwrap_or("a concise abstractive summary of a few sentences");
                format!(
                    "You are a summarization engine. Summarize the user's text as {style}. \
                     Reply with the summary only."
                )
            }
            GatewayMode::Transliterate { target_script } => format!(
                "You are a transliteration engine. Rewrite the user's text in the {target_script} \
                 script without translating it; the language must stay the same. \
                 Reply with the transliterated text only."
            ),
            GatewayMode::Answer => format!(
                "You answer questions using only the provided context. If the context does not \
                 contain the answer, reply with exactly {NO_ANSWER_SENTINEL}."
            ),
        }
    }

    /// Only an answer may legitimately be empty: it means "not in this context"
    fn accepts_empty_reply(&self) -> bool {
        matches!(self, GatewayMode::Answer)
    }

    fn name(&self) -> &'static str {
        match self {
            GatewayMode::Translate { .. } => "translate",
            GatewayMode::Summarize { .. } => "summarize",
            GatewayMode::Transliterate { .. } => "transliterate",
            GatewayMode::Answer => "answer",
        }
    }
}

/// Retry and timeout policy for gateway calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &AiConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.retry_backoff_ms),
            attempt_timeout: config.request_timeout(),
        }
    }

    /// Delay before the given retry (1-based)
    fn backoff(&self, retry: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
    }
}

pub struct AiGateway {
    backend: Arc<dyn CompletionBackend>,
    policy: RetryPolicy,
}

impl AiGateway {
    pub fn new(backend: Arc<dyn CompletionBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    pub async fn health_check(&self) -> bool {
        self.backend.health_check().await
    }

    /// Send `prompt` to the backend, shaped for `mode`.
    ///
    /// Transient failures and timeouts are retried up to the policy's attempt
    /// limit; rejections and malformed responses fail immediately.
    pub async fn invoke(&self, prompt: &str, mode: &GatewayMode) -> Result<String, GatewayError> {
        let request = CompletionRequest {
            system: mode.system_instruction(),
            prompt: prompt.to_string(),
        };

        let mut last_error = String::new();

        for attempt in 1..=self.policy.max_attempts {
            if attempt > 1 {
                let backoff = self.policy.backoff(attempt - 1);
                warn!(
                    mode = mode.name(),
                    attempt,
                    max_attempts = self.policy.max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %last_error,
                    "Retrying AI request"
                );
                sleep(backoff).await;
            }

            match timeout(self.policy.attempt_timeout, self.backend.complete(&request)).await {
                Ok(Ok(text)) if text.trim().is_empty() && !mode.accepts_empty_reply() => {
                    warn!(mode = mode.name(), "AI response contained no text");
                    return Err(GatewayError::InvalidResponse {
                        message: "response contained no text".to_string(),
                    });
                }
                Ok(Ok(text)) => {
                    debug!(mode = mode.name(), attempt, chars = text.len(), "AI request succeeded");
                    return Ok(text);
                }
                Ok(Err(BackendFailure::Transient(message))) => {
                    last_error = message;
                }
                Ok(Err(BackendFailure::Rejected { status, message })) => {
                    warn!(mode = mode.name(), status, "AI request rejected");
                    return Err(GatewayError::Rejected { status, message });
                }
                Ok(Err(BackendFailure::Malformed(message))) => {
                    warn!(mode = mode.name(), error = %message, "AI response unusable");
                    return Err(GatewayError::InvalidResponse { message });
                }
                Err(_) => {
                    last_error = format!(
                        "timed out after {}ms",
                        self.policy.attempt_timeout.as_millis()
                    );
                }
            }
        }

        Err(GatewayError::Unavailable {
            attempts: self.policy.max_attempts,
            last_error,
        })
    }
}
