use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::AiConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::gateway::{BackendFailure, CompletionBackend, CompletionRequest};

/// Ollama API client
pub struct OllamaClient {
    client: Client,
    config: AiConfig,
}

impl OllamaClient {
    /// Create a new Ollama client
    pub fn new(config: AiConfig) -> ServiceResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ServiceError::Config {
                message: format!("Failed to build HTTP client for {}: {}", config.base_url, e),
            })?;

        Ok(Self { client, config })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }
}

#[async_trait]
impl CompletionBackend for OllamaClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, BackendFailure> {
        let url = format!("{}/api/chat", self.config.base_url);

        let body = OllamaChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendFailure::Transient(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(classify_status(status, message));
        }

        let chat_response: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| BackendFailure::Malformed(format!("undecodable response body: {e}")))?;

        Ok(chat_response.message.content)
    }

    /// Check if Ollama is available
    async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.config.base_url);

        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(error = %e, "Ollama health check failed");
                false
            }
        }
    }
}

/// Timeouts and server errors are worth retrying. Client errors, including
/// 429 quota exhaustion, are not.
fn classify_status(status: StatusCode, message: String) -> BackendFailure {
    if status == StatusCode::REQUEST_TIMEOUT || status.is_server_error() {
        BackendFailure::Transient(format!("status {}: {}", status.as_u16(), message))
    } else {
        BackendFailure::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

// Internal Ollama API types

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, String::new()),
            BackendFailure::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::GATEWAY_TIMEOUT, String::new()),
            BackendFailure::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "quota exceeded".to_string()),
            BackendFailure::Rejected { status: 429, .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "bad key".to_string()),
            BackendFailure::Rejected { status: 401, .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, "model not found".to_string()),
            BackendFailure::Rejected { status: 404, .. }
        ));
    }

    #[test]
    fn test_chat_request_shape() {
        let body = OllamaChatRequest {
            model: "llama3.2",
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
            stream: false,
            options: OllamaOptions { temperature: 0.5 },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "llama3.2");
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["options"]["temperature"], 0.5);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient() {
        let mut config = crate::config::default_ai();
        config.base_url = "http://127.0.0.1:9".to_string();
        config.request_timeout_secs = 2;
        let client = OllamaClient::new(config).unwrap();

        let result = client
            .complete(&CompletionRequest {
                system: "s".to_string(),
                prompt: "p".to_string(),
            })
            .await;
        assert!(matches!(result, Err(BackendFailure::Transient(_))));
        assert!(!client.health_check().await);
    }
}
