//! Client for OpenAI-compatible chat completion endpoints.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use relay_common::config::CompletionConfig;
use serde::{Deserialize, Serialize};

use crate::session::ChatMessage;

/// Longest upstream body kept in an error.
pub const MAX_ERROR_EXCERPT_CHARS: usize = 2000;

/// Completion failure.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("completion service not configured: {0}")]
    NotConfigured(&'static str),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("status {status}: {excerpt}")]
    Status { status: u16, excerpt: String },

    #[error("no response from completion service")]
    EmptyResponse,

    #[error("{kind}: {message}")]
    Provider { kind: String, message: String },

    #[error("failed to parse response: {0}")]
    Decode(String),
}

impl From<CompletionError> for relay_common::Error {
    fn from(e: CompletionError) -> Self {
        Self::Completion(e.to_string())
    }
}

/// Produces one assistant reply for an ordered message list.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError>;
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<ProviderErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    message: String,
}

/// HTTP client for `{api_url}/v1/chat/completions`.
pub struct OpenAiCompatibleClient {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    http_referer: Option<String>,
    x_title: Option<String>,
    client: Client,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &CompletionConfig) -> Self {
        Self {
            endpoint: format!("{}/v1/chat/completions", config.api_url.trim_end_matches('/')),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            model: config.model.clone(),
            http_referer: config.http_referer.clone(),
            x_title: config.x_title.clone(),
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(MAX_ERROR_EXCERPT_CHARS).collect()
}

#[async_trait]
impl CompletionClient for OpenAiCompatibleClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(CompletionError::NotConfigured("API key not set"))?;
        if self.model.is_empty() {
            return Err(CompletionError::NotConfigured("model not set"));
        }

        let start = Instant::now();
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&CompletionRequest {
                model: &self.model,
                messages,
            });
        if let Some(referer) = &self.http_referer {
            request = request.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.x_title {
            request = request.header("X-Title", title);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(CompletionError::Status {
                status: status.as_u16(),
                excerpt: excerpt(&body),
            });
        }

        let parsed: CompletionResponse =
            serde_json::from_str(&body).map_err(|e| CompletionError::Decode(e.to_string()))?;

        let Some(choice) = parsed.choices.into_iter().next() else {
            return Err(match parsed.error {
                Some(err) => CompletionError::Provider {
                    kind: err.kind,
                    message: err.message,
                },
                None => CompletionError::EmptyResponse,
            });
        };

        if choice.message.content.trim().is_empty() {
            return Err(CompletionError::EmptyResponse);
        }

        tracing::debug!(
            model = %self.model,
            messages = messages.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Completion received"
        );

        Ok(choice.message.content)
    }
}
