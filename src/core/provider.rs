//! Language-model completion seam.

use crate::core::message::{ConversationMessage, PendingToolCall};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Tool description handed to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

pub struct CompletionRequest<'a> {
    pub messages: &'a [ConversationMessage],
    pub tools: &'a [ToolSpec],
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub text: Option<String>,
    pub tool_calls: Vec<PendingToolCall>,
    pub usage: Option<TokenUsage>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn tool_calls(tool_calls: Vec<PendingToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::default()
        }
    }

    /// Text content when present and not blank.
    pub fn visible_text(&self) -> Option<&str> {
        self.text.as_deref().filter(|text| !text.trim().is_empty())
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    #[error("provider rate limit reached: {0}")]
    RateLimited(String),
    #[error("conversation exceeds the model context length: {0}")]
    ContextLengthExceeded(String),
    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("provider request failed: {0}")]
    Transport(String),
    #[error("unable to decode provider response: {0}")]
    Decode(String),
    #[error("missing API key; set {0}")]
    MissingCredentials(String),
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),
}

impl ProviderError {
    /// Rate-limit and context-length failures end the turn with a warning
    /// instead of propagating.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_) | ProviderError::ContextLengthExceeded(_)
        )
    }

    /// Maps a failed HTTP exchange onto the recognisable error kinds.
    pub fn from_http(status: u16, body: String) -> Self {
        let lowered = body.to_ascii_lowercase();
        if status == 429 || lowered.contains("rate limit") || lowered.contains("rate_limit") {
            ProviderError::RateLimited(body)
        } else if lowered.contains("maximum context length")
            || lowered.contains("context_length_exceeded")
        {
            ProviderError::ContextLengthExceeded(body)
        } else {
            ProviderError::Http { status, body }
        }
    }
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Provider identifier such as `openai`.
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Returns `Ok(None)` when the provider produced no message at all.
    async fn complete(
        &self,
        request: CompletionRequest<'_>,
    ) -> Result<Option<Completion>, ProviderError>;
}
