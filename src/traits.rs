//! Provider adapter trait and the shared request/response shapes.
//!
//! # WHY: one trait, three wire formats
//!
//! OpenAI, Anthropic and Gemini disagree on where system text goes, how roles
//! are named and how errors look. Each adapter hides one dialect behind
//! [`ProviderAdapter`]; the router only ever sees [`SendArgs`], [`SendResult`],
//! [`LlmError`] and [`AdapterError::Cancelled`].

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::error::{LlmError, RawFailure};
use crate::registry::{ModelItem, ProviderId};

// ============================================================================
// Messages
// ============================================================================

/// Role of a chat message. System text travels separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// A single conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A recorded turn, tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: ChatRole,
    pub content: String,
    pub provider: ProviderId,
    pub model: String,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    /// Create an entry stamped with the current time.
    pub fn new(role: ChatRole, content: impl Into<String>, provider: ProviderId, model: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            provider,
            model: model.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn to_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

// ============================================================================
// Adapter I/O
// ============================================================================

/// Everything an adapter needs for one call.
#[derive(Clone)]
pub struct SendArgs {
    pub api_key: String,
    pub model: String,
    /// Instruction text; empty means none.
    pub system: String,
    /// Conversation, never starting with an assistant turn.
    pub messages: Vec<ChatMessage>,
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub cancel: CancellationToken,
}

impl SendArgs {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            system: String::new(),
            messages,
            max_output_tokens: None,
            temperature: None,
            top_p: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    pub fn with_max_output_tokens(mut self, max: Option<u32>) -> Self {
        self.max_output_tokens = max;
        self
    }

    pub fn with_sampling(mut self, temperature: Option<f32>, top_p: Option<f32>) -> Self {
        self.temperature = temperature;
        self.top_p = top_p;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// System text if it has any non-whitespace content.
    pub fn system_text(&self) -> Option<&str> {
        Some(self.system.as_str()).filter(|s| !s.trim().is_empty())
    }
}

impl fmt::Debug for SendArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendArgs")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("system_chars", &self.system.chars().count())
            .field("messages", &self.messages.len())
            .field("max_output_tokens", &self.max_output_tokens)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .finish()
    }
}

/// Token usage reported by a provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    /// The provider's own usage object.
    pub raw: JsonValue,
}

impl Usage {
    /// Read usage from a provider object using its field names.
    pub(crate) fn from_fields(raw: JsonValue, input: &str, output: &str, total: Option<&str>) -> Self {
        let field = |name: &str| raw.get(name).and_then(JsonValue::as_u64);
        let input_tokens = field(input);
        let output_tokens = field(output);
        let total_tokens = total.and_then(field).or(match (input_tokens, output_tokens) {
            (Some(i), Some(o)) => Some(i + o),
            _ => None,
        });
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
            raw,
        }
    }
}

/// Successful adapter call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendResult {
    pub text: String,
    pub usage: Option<Usage>,
    pub request_id: Option<String>,
    pub status: Option<u16>,
}

/// Ways an adapter call can end without a result.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The caller cancelled. Not a failure.
    #[error("request cancelled")]
    Cancelled,

    /// Already classified by the adapter.
    #[error(transparent)]
    Normalized(#[from] LlmError),

    /// Not yet classified; the router asks the adapter to normalize it.
    #[error("unclassified provider failure: {0}")]
    Raw(RawFailure),
}

impl AdapterError {
    /// Classify a raw failure with `classify`, leaving other variants alone.
    pub fn normalize_with(self, classify: impl FnOnce(&RawFailure) -> LlmError) -> Self {
        match self {
            AdapterError::Raw(raw) => AdapterError::Normalized(classify(&raw)),
            other => other,
        }
    }
}

// ============================================================================
// Provider Adapter Trait
// ============================================================================

/// One provider's translation layer.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Which provider this adapter speaks to.
    fn id(&self) -> ProviderId;

    /// Human readable provider name.
    fn display_name(&self) -> &str {
        self.id().label()
    }

    /// Send one request. Cancellation must surface as [`AdapterError::Cancelled`].
    async fn send(&self, args: SendArgs) -> Result<SendResult, AdapterError>;

    /// Classify a raw transport failure into the shared taxonomy.
    fn normalize_error(&self, raw: &RawFailure) -> LlmError;

    /// List models available to `api_key`, already filtered for chat use.
    async fn list_models(&self, api_key: &str, cancel: &CancellationToken) -> Result<Vec<ModelItem>, AdapterError>;
}
