//! Anthropic Messages API client
//!
//! Sends one non-streaming completion per advisor call. Only text blocks of
//! the reply are kept.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::{BuildFixerError, Result};
use crate::llm::client::LlmClient;
use crate::llm::types::{CompletionRequest, CompletionResponse, Message, StopReason, Usage};

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Connection settings for [`AnthropicClient`]
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub model: String,
    pub max_tokens: u32,
    /// HTTP timeout; the advisor timeout bounds the whole call separately
    pub timeout: Duration,
    pub api_key_env: String,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: Duration::from_secs(120),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct MessagesReply {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

/// Client for the Anthropic Messages API
pub struct AnthropicClient {
    http: Client,
    api_key: String,
    config: AnthropicConfig,
    usage: Arc<Mutex<Usage>>,
}

impl AnthropicClient {
    /// Client whose key is read from the `config.api_key_env` variable
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| BuildFixerError::Llm(format!("{} not set", config.api_key_env)))?;
        Self::with_api_key(api_key, config)
    }

    pub fn with_api_key(api_key: String, config: AnthropicConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BuildFixerError::Llm(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_key,
            config,
            usage: Arc::new(Mutex::new(Usage::default())),
        })
    }

    fn body<'a>(&'a self, request: &'a CompletionRequest) -> MessagesBody<'a> {
        MessagesBody {
            model: request.model.as_deref().unwrap_or(&self.config.model),
            max_tokens: request.max_tokens.unwrap_or(self.config.max_tokens),
            system: &request.system,
            messages: &request.messages,
            temperature: request.temperature,
        }
    }

    fn completion_from(&self, reply: MessagesReply) -> CompletionResponse {
        if let Ok(mut total) = self.usage.lock() {
            total.add(&reply.usage);
        }

        let content = reply
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        let stop_reason = StopReason::from_api(reply.stop_reason.as_deref());
        if stop_reason == StopReason::MaxTokens {
            warn!("Reply cut off at the token limit; the action may be incomplete");
        }

        CompletionResponse {
            content,
            stop_reason,
            usage: reply.usage,
        }
    }

    async fn post(&self, body: &MessagesBody<'_>) -> Result<MessagesReply> {
        let response = self
            .http
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| BuildFixerError::Llm(format!("Request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .unwrap_or("?")
                .to_string();
            return Err(BuildFixerError::Llm(format!("Rate limited, retry after {}s", retry_after)));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BuildFixerError::Llm(format!("API error {}: {}", status, text)));
        }

        response
            .json()
            .await
            .map_err(|e| BuildFixerError::Llm(format!("Failed to parse response: {}", e)))
    }

    /// Tokens spent by this client so far
    pub fn total_usage(&self) -> Usage {
        self.usage.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = self.body(&request);
        debug!(
            "Completion request to {} ({} messages, max_tokens {})",
            body.model,
            body.messages.len(),
            body.max_tokens
        );
        let reply = self.post(&body).await?;
        Ok(self.completion_from(reply))
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("model", &self.config.model)
            .field("max_tokens", &self.config.max_tokens)
            .finish()
    }
}
