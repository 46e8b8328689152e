//! Model API client with streaming support.
//!
//! # Architecture
//!
//! - [`ChatClient`] - HTTP client for an OpenAI-compatible chat-completions
//!   endpoint, streaming enabled on every request
//! - [`stream`] - Line-oriented stream decoding and tool-call reassembly
//! - [`sse_types`] - Typed wire payloads for the streamed records
//!
//! The client's single entry point, [`ChatClient::send_streaming`], drives
//! the whole exchange: it sends the conversation plus tool definitions,
//! invokes a caller-supplied callback for every decoded chunk, and returns
//! the reconstructed [`CompleteResponse`].
//!
//! # Error Handling
//!
//! Malformed records inside an established stream are logged and skipped so
//! a single bad record never discards the rest of the response. Hard errors
//! are reserved for request construction, non-success HTTP status, and
//! transport failures while reading the body.

pub mod sse_types;
pub mod stream;

use std::time::Duration;

use serde_json::json;
use thiserror::Error;

use dbchat_types::{ChatMessage, ToolDefinition};

pub use crate::sse_types::ChatCompletionChunk;
pub use crate::stream::{CompleteResponse, ToolCallAccumulator, decode_stream};

/// Default OpenAI-compatible chat-completions endpoint.
pub const DEFAULT_BASE_URL: &str =
    "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions";
/// Model requested when the configuration does not name one.
pub const DEFAULT_MODEL: &str = "qwen-plus";

const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_MAX_TOKENS: u32 = 2000;
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Errors surfaced by the streaming client.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("API key is not configured")]
    MissingApiKey,

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API returned status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("failed to read response stream: {0}")]
    Read(String),
}

/// Connection settings for the model endpoint.
#[derive(Clone)]
pub struct ChatConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl ChatConfig {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

// Manual Debug so the key never reaches logs.
impl std::fmt::Debug for ChatConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

fn redact(key: &str) -> String {
    if key.is_empty() {
        "<unset>".to_string()
    } else {
        let shown: String = key.chars().take(6).collect();
        format!("{shown}...")
    }
}

/// Streaming HTTP client for one model endpoint.
#[derive(Debug, Clone)]
pub struct ChatClient {
    config: ChatConfig,
    client: reqwest::Client,
}

impl ChatClient {
    pub fn new(config: ChatConfig) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { config, client })
    }

    #[must_use]
    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    fn build_request_body(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> serde_json::Value {
        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "stream": true,
            "max_tokens": self.config.max_tokens,
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
            body["tool_choice"] = json!("auto");
        }
        body
    }

    /// Send the conversation and reconstruct the streamed reply.
    ///
    /// `on_chunk` observes every decoded chunk in arrival order, before the
    /// chunk's deltas are folded into the returned [`CompleteResponse`].
    pub async fn send_streaming<F>(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        on_chunk: F,
    ) -> Result<CompleteResponse, StreamError>
    where
        F: FnMut(&ChatCompletionChunk),
    {
        if !self.config.is_configured() {
            return Err(StreamError::MissingApiKey);
        }

        let body = self.build_request_body(messages, tools);
        tracing::debug!(
            model = %self.config.model,
            messages = messages.len(),
            tools = tools.len(),
            "sending streaming chat request"
        );

        let response = self
            .client
            .post(&self.config.base_url)
            .bearer_auth(&self.config.api_key)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, "chat request rejected");
            return Err(StreamError::Status { status, body });
        }

        decode_stream(response.bytes_stream(), on_chunk).await
    }
}
