//! GPT Helper LLM - request routing for OpenAI, Anthropic and Gemini
//!
//! One router in front of three chat APIs. The host hands it a prompt, some
//! history and an optional instruction text; the router picks the configured
//! provider, finds the key, builds a payload under a hard size cap, sends it,
//! and returns either text, a classified [`LlmError`], or `None` when the
//! caller cancelled.
//!
//! # Providers
//!
//! | Provider | Endpoint | System text | Model listing |
//! |----------|----------|-------------|---------------|
//! | OpenAI | `POST /v1/responses` | `instructions` | `/v1/models` |
//! | Anthropic | `POST /v1/messages` | top-level `system` | `/v1/models`, `after_id` paging |
//! | Gemini | `POST /v1beta/models/{m}:generateContent` | `systemInstruction` | `/v1beta/models`, `pageToken` paging |
//! | Mock | none | recorded | scripted |
//!
//! # Architecture
//!
//! ```text
//! LlmRouter ──▶ RouterContext { ConfigStore, SecretStore, LegacyKeyStore, warn, AdapterSet }
//!     │
//!     ├─ sizing      (char counts, head/tail truncation)
//!     ├─ registry    (providers, default models, output caps)
//!     └─ providers   (ProviderAdapter per wire format) ──▶ error (normalized taxonomy)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use gpthelper_llm::{LlmRouter, MemorySecretStore, RouterContext, SendRequest, TomlConfig};
//!
//! let ctx = RouterContext::new(Arc::new(TomlConfig::load()?), Arc::new(MemorySecretStore::new()));
//! let router = LlmRouter::new(ctx);
//! router.set_api_key(ProviderId::OpenAI, "sk-...").await?;
//! if let Some(outcome) = router.send(SendRequest::new("Explain this function")).await? {
//!     println!("{}", outcome.text);
//! }
//! ```
//!
//! # See Also
//!
//! - [`crate::router`] for the send pipeline
//! - [`crate::providers`] for the wire formats
//! - [`crate::error`] for the error taxonomy

pub mod discovery;
pub mod error;
pub mod factory;
pub mod history;
pub mod providers;
pub mod registry;
pub mod router;
pub mod sanitize;
pub mod secrets;
pub mod settings;
pub mod sizing;
pub mod traits;

pub use discovery::{ModelCacheEntry, ModelCatalog, ModelSource};
pub use error::{
    extract_request_id, parse_retry_after, ErrorKind, LlmError, MessageContext, RawFailure, Result,
};
pub use factory::{AdapterSet, ProviderFactory};
pub use history::ChatHistory;
pub use providers::{AnthropicAdapter, GeminiAdapter, MockAdapter, MockOutcome, OpenAIAdapter};
pub use registry::{
    build_picker_items, default_model_id, is_valid_provider_id, known_max_output_tokens,
    static_models, ModelItem, ProviderId,
};
pub use router::{
    enforce_char_cap, normalize_sampling, resolve_max_output_tokens, select_history, ContextMode,
    KeyUpdate, LlmRouter, RouterContext, RouterLimits, SendOutcome, SendRequest,
};
pub use sanitize::sanitize_for_debug;
pub use secrets::{LegacyKeyStore, MemoryLegacyStore, MemorySecretStore, SecretStore, StoreError};
pub use settings::{ConfigStore, MemoryConfig, SettingValue, SettingsError, TomlConfig};
pub use sizing::{count_request_chars, estimate_tokens_from_chars, truncate_head_tail, TruncateOptions};
pub use traits::{
    AdapterError, ChatMessage, ChatRole, HistoryEntry, ProviderAdapter, SendArgs, SendResult, Usage,
};
