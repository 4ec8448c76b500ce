//! Language-model client.
//!
//! The verifier only needs one-shot text completion: a system instruction, a
//! list of messages, a model identifier and an output cap go in, generated text
//! comes out. Two wire formats are supported:
//! - Anthropic messages (`system` field + `content` blocks)
//! - OpenAI-compatible chat completions (system prompt as the first message)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config;

/// Result type for model operations
pub type LlmResult<T> = Result<T, LlmError>;

/// Errors that can occur while talking to the model service
#[derive(Debug, Error)]
pub enum LlmError {
    /// Failed to reach the endpoint
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// The endpoint answered with a non-success status
    #[error("model service returned {status}: {body}")]
    Status { status: u16, body: String },
    /// Response could not be decoded or carried no text
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Request format spoken by the endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFlavor {
    Anthropic,
    OpenAi,
}

impl ApiFlavor {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open-ai" | "chat" => ApiFlavor::OpenAi,
            _ => ApiFlavor::Anthropic,
        }
    }
}

/// One conversational turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A single completion request
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub model: String,
    pub max_tokens: u32,
}

/// Text-in, text-out model boundary
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> LlmResult<String>;
}

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub endpoint: String,
    pub flavor: ApiFlavor,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    /// Whole-request timeout (seconds)
    pub timeout: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let cfg = &config::get().llm;
        Self {
            endpoint: cfg.endpoint.clone(),
            flavor: ApiFlavor::parse(&cfg.flavor),
            model: cfg.model.clone(),
            api_key: cfg.api_key.clone(),
            max_tokens: cfg.max_tokens,
            timeout: cfg.timeout,
        }
    }
}

impl LlmConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn flavor(mut self, flavor: ApiFlavor) -> Self {
        self.flavor = flavor;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds;
        self
    }
}

/// HTTP implementation of [`LanguageModel`]
pub struct HttpLanguageModel {
    client: Client,
    config: LlmConfig,
}

impl HttpLanguageModel {
    pub fn new(config: LlmConfig) -> LlmResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| LlmError::ConnectionFailed(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    fn build_body(&self, request: &CompletionRequest) -> serde_json::Value {
        match self.config.flavor {
            ApiFlavor::Anthropic => serde_json::json!({
                "model": request.model,
                "max_tokens": request.max_tokens,
                "system": request.system,
                "messages": request.messages,
            }),
            ApiFlavor::OpenAi => {
                let mut messages = vec![serde_json::json!({
                    "role": "system",
                    "content": request.system,
                })];
                messages.extend(
                    request
                        .messages
                        .iter()
                        .map(|m| serde_json::json!({ "role": m.role, "content": m.content })),
                );
                serde_json::json!({
                    "model": request.model,
                    "max_tokens": request.max_tokens,
                    "messages": messages,
                })
            }
        }
    }
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    async fn complete(&self, request: CompletionRequest) -> LlmResult<String> {
        let body = self.build_body(&request);
        let mut builder = self.client.post(&self.config.endpoint).json(&body);

        if let Some(key) = &self.config.api_key {
            builder = match self.config.flavor {
                ApiFlavor::Anthropic => builder
                    .header("x-api-key", key)
                    .header("anthropic-version", "2023-06-01"),
                ApiFlavor::OpenAi => builder.bearer_auth(key),
            };
        } else if self.config.flavor == ApiFlavor::Anthropic {
            builder = builder.header("anthropic-version", "2023-06-01");
        }

        tracing::debug!(model = %request.model, endpoint = %self.config.endpoint, "model request");

        let response = builder
            .send()
            .await
            .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<response unavailable>".to_string());
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        extract_text(self.config.flavor, &json)
    }
}

/// Pull the generated text out of a response body
fn extract_text(flavor: ApiFlavor, response: &serde_json::Value) -> LlmResult<String> {
    let text = match flavor {
        ApiFlavor::Anthropic => response["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b["type"] == "text")
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default(),
        ApiFlavor::OpenAi => {
            let message = &response["choices"][0]["message"];
            // Thinking models may only fill reasoning_content
            message["content"]
                .as_str()
                .filter(|s| !s.is_empty())
                .or_else(|| message["reasoning_content"].as_str())
                .unwrap_or_default()
                .to_string()
        }
    };

    if text.trim().is_empty() {
        return Err(LlmError::InvalidResponse("response carried no text".to_string()));
    }
    Ok(text)
}
