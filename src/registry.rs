//! Provider identity and static model registry.
//!
//! # Purpose
//!
//! The router talks to a closed set of providers. This module owns everything
//! that is pure data about them: identifiers, display labels, storage keys,
//! default model ids, the static fallback model lists and the per-model output
//! token ceilings used for clamping.
//!
//! ```text
//! ┌──────────────┬────────────────┬──────────────────┬──────────────────────────────┐
//! │ ProviderId   │ secret key     │ model setting    │ default model                │
//! ├──────────────┼────────────────┼──────────────────┼──────────────────────────────┤
//! │ openai       │ openaiApiKey   │ openai.model     │ gpt-5.2                      │
//! │ anthropic    │ anthropicApiKey│ anthropic.model  │ claude-sonnet-4-5-20250929   │
//! │ gemini       │ geminiApiKey   │ gemini.model     │ gemini-2.5-flash             │
//! └──────────────┴────────────────┴──────────────────┴──────────────────────────────┘
//! ```
//!
//! Unrecognized provider strings resolve to [`ProviderId::OpenAI`].

use serde::{Deserialize, Serialize};

/// Picker entry id that triggers an online refresh of the model list.
pub const REFRESH_ITEM_ID: &str = "__refresh__";

/// Picker entry id that lets the user type any model id.
pub const CUSTOM_ITEM_ID: &str = "__custom__";

// ============================================================================
// Provider Identity
// ============================================================================

/// One of the supported LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    /// OpenAI Responses API.
    #[default]
    OpenAI,
    /// Anthropic Messages API.
    Anthropic,
    /// Google Gemini generateContent API.
    Gemini,
}

impl ProviderId {
    /// Every provider, in fallback order.
    pub const ALL: [ProviderId; 3] = [ProviderId::OpenAI, ProviderId::Anthropic, ProviderId::Gemini];

    /// Parse a configured provider id. Returns `None` for unknown values.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "openai" => Some(Self::OpenAI),
            "anthropic" => Some(Self::Anthropic),
            "gemini" => Some(Self::Gemini),
            _ => None,
        }
    }

    /// Parse a configured provider id, falling back to the first provider.
    pub fn resolve(raw: Option<&str>) -> Self {
        raw.and_then(Self::parse).unwrap_or(Self::ALL[0])
    }

    /// Wire identifier (`openai`, `anthropic`, `gemini`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }

    /// Human readable provider name.
    pub fn label(&self) -> &'static str {
        match self {
            Self::OpenAI => "OpenAI",
            Self::Anthropic => "Anthropic",
            Self::Gemini => "Gemini",
        }
    }

    /// Key under which the provider's API key lives in secret storage.
    pub fn secret_key(&self) -> &'static str {
        match self {
            Self::OpenAI => "openaiApiKey",
            Self::Anthropic => "anthropicApiKey",
            Self::Gemini => "geminiApiKey",
        }
    }

    /// Configuration key holding the selected model id.
    pub fn model_setting_key(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai.model",
            Self::Anthropic => "anthropic.model",
            Self::Gemini => "gemini.model",
        }
    }

    /// Model used when nothing is configured.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-5.2",
            Self::Anthropic => "claude-sonnet-4-5-20250929",
            Self::Gemini => "gemini-2.5-flash",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `raw` names one of the supported providers.
pub fn is_valid_provider_id(raw: &str) -> bool {
    ProviderId::parse(raw).is_some()
}

// ============================================================================
// Model Items
// ============================================================================

/// A selectable model, as shown in a picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelItem {
    /// Display label.
    pub label: String,
    /// Provider model id.
    pub id: String,
    /// Optional secondary line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ModelItem {
    /// Create an item without detail text.
    pub fn new(label: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            id: id.into(),
            detail: None,
        }
    }

    /// Attach a detail line.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

const OPENAI_MODELS: &[(&str, &str)] = &[
    ("GPT-5.2", "gpt-5.2"),
    ("GPT-5.2 pro", "gpt-5.2-pro"),
    ("GPT-5.1", "gpt-5.1"),
    ("GPT-5", "gpt-5"),
    ("GPT-5 mini", "gpt-5-mini"),
    ("GPT-5 nano", "gpt-5-nano"),
    ("o3", "o3"),
    ("o3-mini", "o3-mini"),
    ("o4-mini", "o4-mini"),
    ("GPT-4.1", "gpt-4.1"),
    ("GPT-4.1 mini", "gpt-4.1-mini"),
    ("GPT-4.1 nano", "gpt-4.1-nano"),
    ("GPT-4o", "gpt-4o"),
    ("GPT-4o mini", "gpt-4o-mini"),
];

const ANTHROPIC_MODELS: &[(&str, &str)] = &[
    ("Claude Sonnet 4.5", "claude-sonnet-4-5-20250929"),
    ("Claude Haiku 4.5", "claude-haiku-4-5-20251001"),
    ("Claude Opus 4.5", "claude-opus-4-5-20251101"),
    ("Claude Opus 4.1", "claude-opus-4-1-20250805"),
    ("Claude Sonnet 4", "claude-sonnet-4-20250514"),
    ("Claude Opus 4", "claude-opus-4-20250514"),
];

const GEMINI_MODELS: &[(&str, &str)] = &[
    ("Gemini 2.5 Flash", "gemini-2.5-flash"),
    ("Gemini 2.5 Pro", "gemini-2.5-pro"),
    ("Gemini 2.5 Flash-Lite", "gemini-2.5-flash-lite"),
    ("Gemini 2.0 Flash", "gemini-2.0-flash"),
    ("Gemini 2.0 Flash-Lite", "gemini-2.0-flash-lite"),
];

/// Output token ceilings OpenAI publishes per model.
const OPENAI_KNOWN_MAX_OUTPUT_TOKENS: &[(&str, u32)] = &[
    ("o3-mini", 100_000),
    ("o1", 100_000),
    ("o1-mini", 65_536),
    ("gpt-4o", 16_384),
    ("gpt-4o-mini", 16_384),
    ("gpt-4-turbo", 4_096),
    ("gpt-3.5-turbo", 4_096),
];

/// Static fallback models for a provider (no refresh/custom entries).
pub fn static_models(provider: ProviderId) -> Vec<ModelItem> {
    let table = match provider {
        ProviderId::OpenAI => OPENAI_MODELS,
        ProviderId::Anthropic => ANTHROPIC_MODELS,
        ProviderId::Gemini => GEMINI_MODELS,
    };
    table
        .iter()
        .map(|(label, id)| ModelItem::new(*label, *id))
        .collect()
}

/// Default model id for a provider.
pub fn default_model_id(provider: ProviderId) -> &'static str {
    provider.default_model()
}

/// Known output-token ceiling for a model, if the provider publishes one.
///
/// Only OpenAI models have entries; every other provider returns `None`.
pub fn known_max_output_tokens(provider: ProviderId, model_id: &str) -> Option<u32> {
    if provider != ProviderId::OpenAI {
        return None;
    }
    OPENAI_KNOWN_MAX_OUTPUT_TOKENS
        .iter()
        .find(|(id, _)| *id == model_id)
        .map(|(_, max)| *max)
}

/// Build the picker list: refresh action, the models, then the custom entry.
pub fn build_picker_items(models: &[ModelItem]) -> Vec<ModelItem> {
    let mut items = Vec::with_capacity(models.len() + 2);
    items.push(
        ModelItem::new("Refresh model list (online)", REFRESH_ITEM_ID)
            .with_detail("Fetch latest models from provider"),
    );
    items.extend(models.iter().cloned());
    items.push(
        ModelItem::new("Custom model id…", CUSTOM_ITEM_ID).with_detail("Enter any provider model id"),
    );
    items
}
