//! One chat turn end to end: validate, build the payload, call the
//! provider, map failures to user-presentable replies.
//!
//! Both the HTTP server and the CLI go through [`respond`], so they share
//! status codes and apology texts.

use serde::Serialize;

use crate::config::Config;
use crate::llm::{self, ChatProvider, GenerationParams, ProviderError};
use crate::models::{ChatRequest, ChatResponse};
use crate::personas::PersonaRegistry;
use crate::prompt::{build_messages, PromptLimits};

pub const RATE_LIMITED_REPLY: &str =
    "I'm currently experiencing high usage. Please wait a moment and try again.";
pub const TOO_LARGE_REPLY: &str =
    "Your message is too long. Please try with a shorter message or smaller file.";
pub const GENERIC_REPLY: &str =
    "I apologize, but I encountered an error while processing your request. Please try again.";

/// HTTP-style status paired with the response body.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatOutcome {
    pub status: u16,
    pub body: ChatResponse,
}

impl ChatOutcome {
    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    fn failure(status: u16, response: &str, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ChatResponse {
                response: response.to_string(),
                error: Some(error.into()),
            },
        }
    }
}

/// Runs one chat turn.
pub async fn respond(
    provider: &dyn ChatProvider,
    personas: &PersonaRegistry,
    config: &Config,
    request: &ChatRequest,
) -> ChatOutcome {
    if request.message.trim().is_empty() {
        return ChatOutcome::failure(400, "", "Message is required");
    }

    if !provider.is_configured() {
        return ChatOutcome::failure(500, "", "API key is not configured");
    }

    let persona = personas.resolve(request.persona_id.as_deref());
    let messages = build_messages(
        &persona,
        &request.history,
        &request.file_context,
        &request.message,
        PromptLimits {
            history_window: config.llm.history_window,
            max_context_chars: config.uploads.max_context_chars,
        },
    );

    tracing::info!(
        persona = %persona.id,
        history = request.history.len(),
        files = request.file_context.len(),
        model = provider.model_name(),
        "chat turn"
    );

    match provider
        .complete(&messages, &GenerationParams::chat(&config.llm))
        .await
    {
        Ok(text) => ChatOutcome {
            status: 200,
            body: ChatResponse {
                response: text,
                error: None,
            },
        },
        Err(e) => {
            tracing::error!(error = %e, "chat completion failed");
            let (status, reply) = classify_chat_error(&e);
            ChatOutcome::failure(status, reply, e.to_string())
        }
    }
}

/// Picks the status and apology for a failed completion.
pub fn classify_chat_error(err: &ProviderError) -> (u16, &'static str) {
    match err {
        ProviderError::RateLimited(_) => (429, RATE_LIMITED_REPLY),
        ProviderError::TooLarge(_) => (413, TOO_LARGE_REPLY),
        ProviderError::NotConfigured(_) => (500, ""),
        _ => (500, GENERIC_REPLY),
    }
}

// ============ Image analysis ============

/// Body of a successful or failed image analysis.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ImageAnalysis {
    Success { description: String, success: bool },
    Failure { error: String, success: bool },
}

/// Describes an image, returning status and body.
pub async fn analyze(
    provider: &dyn ChatProvider,
    config: &Config,
    image_base64: &str,
    mime_type: &str,
) -> (u16, ImageAnalysis) {
    if image_base64.trim().is_empty() {
        return (
            400,
            ImageAnalysis::Failure {
                error: "No image data provided".to_string(),
                success: false,
            },
        );
    }

    match llm::analyze_image(provider, &config.vision, image_base64, mime_type).await {
        Ok(description) => (
            200,
            ImageAnalysis::Success {
                description,
                success: true,
            },
        ),
        Err(e) => {
            tracing::error!(error = %e, "image analysis failed");
            (
                500,
                ImageAnalysis::Failure {
                    error: image_error_message(&e).to_string(),
                    success: false,
                },
            )
        }
    }
}

pub fn image_error_message(err: &ProviderError) -> &'static str {
    match err {
        ProviderError::NotConfigured(_) => "API key is not configured",
        ProviderError::RateLimited(_) => "Image analysis temporarily unavailable due to high usage",
        ProviderError::Blocked(_) => "Image content cannot be analyzed due to safety restrictions",
        _ => "Failed to analyze image",
    }
}
