//! Chat-completion provider abstraction and implementations.
//!
//! Defines the [`ChatProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]**: fails every call; used when no model is configured.
//! - **[`OpenAIProvider`]**: calls an OpenAI-compatible `POST /chat/completions`.
//!
//! # Provider Selection
//!
//! Use [`create_provider`] to instantiate the appropriate provider based
//! on the configuration:
//!
//! ```rust,no_run
//! # use lumo::config::LlmConfig;
//! # use lumo::llm::create_provider;
//! let mut config = LlmConfig::default();
//! config.provider = "disabled".to_string();
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "disabled");
//! ```
//!
//! # Failure Classification
//!
//! Every call is a single request. Nothing is retried; failures are
//! classified so callers can pick a user-facing message:
//!
//! | Provider reply | [`ProviderError`] |
//! |----------------|-------------------|
//! | 429, or body mentions quota / rate limit | `RateLimited` |
//! | 413, or a 4xx whose body mentions tokens / too large | `TooLarge` |
//! | Body mentions `SAFETY` or a content filter | `Blocked` |
//! | Any other non-2xx | `Http` |
//! | Transport failure or timeout | `Network` |

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::config::{LlmConfig, VisionConfig};

/// Prompt sent alongside an image for vision analysis.
pub const IMAGE_ANALYSIS_PROMPT: &str = "Please analyze this image and provide a detailed description. Include:
- What you see in the image (objects, people, animals, etc.)
- The setting or environment
- Colors, lighting, and composition
- Any text visible in the image
- The overall mood or atmosphere
- Any notable details or interesting elements

Provide a natural, conversational description as if you're describing the image to someone who can't see it.";

// ============ Errors ============

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{0}")]
    NotConfigured(String),
    #[error("rate limit exceeded (429): {0}")]
    RateLimited(String),
    #[error("request too large, token limit exceeded: {0}")]
    TooLarge(String),
    #[error("content blocked by SAFETY filter: {0}")]
    Blocked(String),
    #[error("provider error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Maps a non-success reply to the most specific [`ProviderError`].
pub fn classify_failure(status: u16, body: &str) -> ProviderError {
    let lower = body.to_lowercase();
    if status == 429 || lower.contains("quota") || lower.contains("rate limit") {
        ProviderError::RateLimited(body.to_string())
    } else if status == 413 || lower.contains("token") || lower.contains("too large") {
        ProviderError::TooLarge(body.to_string())
    } else if body.contains("SAFETY") || lower.contains("content_filter") {
        ProviderError::Blocked(body.to_string())
    } else {
        ProviderError::Http {
            status,
            body: body.to_string(),
        }
    }
}

// ============ Wire types ============

/// One role-tagged message in a completion request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self::text("system", text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text("user", text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text("assistant", text)
    }

    pub fn text(role: &str, text: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: MessageContent::Text(text.into()),
        }
    }

    /// Plain text of the message; image parts are skipped.
    pub fn text_content(&self) -> String {
        match &self.content {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ImageUrl {
    pub url: String,
}

/// Sampling settings for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    /// Overrides the provider's default model when set.
    pub model: Option<String>,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl GenerationParams {
    pub fn chat(config: &LlmConfig) -> Self {
        Self {
            model: None,
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
        }
    }

    pub fn vision(config: &VisionConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
        }
    }
}

// ============ Provider trait ============

/// A backend that turns a message list into a single reply.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Whether calls can succeed at all. Disabled providers report `false`.
    fn is_configured(&self) -> bool {
        true
    }

    /// Sends one completion request and returns the reply text.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<String, ProviderError>;
}

// ============ Disabled Provider ============

/// A provider that always fails with [`ProviderError::NotConfigured`].
///
/// Used when `llm.provider = "disabled"` or when the API key variable is
/// unset, so the server still starts and reports the problem per request.
pub struct DisabledProvider {
    reason: String,
}

impl DisabledProvider {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ChatProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn is_configured(&self) -> bool {
        false
    }

    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _params: &GenerationParams,
    ) -> Result<String, ProviderError> {
        Err(ProviderError::NotConfigured(self.reason.clone()))
    }
}

// ============ OpenAI Provider ============

/// Provider for any OpenAI-compatible chat-completions endpoint.
pub struct OpenAIProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAIProvider {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<String, ProviderError> {
        let model = params.model.as_deref().unwrap_or(&self.model);
        let body = serde_json::json!({
            "model": model,
            "messages": messages,
            "temperature": params.temperature,
            "top_p": params.top_p,
            "max_tokens": params.max_tokens,
        });

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), model, "completion request failed");
            return Err(classify_failure(status.as_u16(), &body_text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        parse_completion_response(&json)
    }
}

/// Extracts `choices[0].message.content` from a completion response.
fn parse_completion_response(json: &serde_json::Value) -> Result<String, ProviderError> {
    let choice = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| ProviderError::InvalidResponse("missing choices array".to_string()))?;

    if choice.get("finish_reason").and_then(|r| r.as_str()) == Some("content_filter") {
        return Err(ProviderError::Blocked(
            "response stopped by SAFETY filter".to_string(),
        ));
    }

    choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ProviderError::InvalidResponse("missing message content".to_string()))
}

/// Create the appropriate [`ChatProvider`] based on configuration.
///
/// # Supported Providers
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`], or [`DisabledProvider`] when the key is unset |
pub fn create_provider(config: &LlmConfig) -> Result<Box<dyn ChatProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider::new(
            "Chat provider is disabled",
        ))),
        "openai" => match config.api_key() {
            Some(key) => Ok(Box::new(OpenAIProvider::new(
                &config.base_url,
                &config.model,
                key,
                Duration::from_secs(config.timeout_secs),
            )?)),
            None => {
                tracing::warn!(
                    env = %config.api_key_env,
                    "API key not set; chat requests will fail"
                );
                Ok(Box::new(DisabledProvider::new(format!(
                    "API key is not configured (set {})",
                    config.api_key_env
                ))))
            }
        },
        other => bail!("Unknown llm provider: {}", other),
    }
}

/// Asks the provider to describe a base64-encoded image.
pub async fn analyze_image(
    provider: &dyn ChatProvider,
    config: &VisionConfig,
    base64_data: &str,
    mime_type: &str,
) -> Result<String, ProviderError> {
    let mime = if mime_type.is_empty() {
        "image/png"
    } else {
        mime_type
    };
    let message = ChatMessage {
        role: "user".to_string(),
        content: MessageContent::Parts(vec![
            ContentPart::Text {
                text: IMAGE_ANALYSIS_PROMPT.to_string(),
            },
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:{};base64,{}", mime, base64_data),
                },
            },
        ]),
    };
    provider
        .complete(&[message], &GenerationParams::vision(config))
        .await
}
