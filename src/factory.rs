//! Adapter construction.
//!
//! # Environment Variables
//!
//! Optional host overrides (proxies, gateways, local mocks):
//! - `OPENAI_BASE_URL`
//! - `ANTHROPIC_BASE_URL`
//! - `GEMINI_BASE_URL`
//!
//! # Example
//!
//! ```rust,ignore
//! use gpthelper_llm::ProviderFactory;
//!
//! let adapters = ProviderFactory::from_env();
//! let gemini = adapters.get(ProviderId::Gemini);
//! ```

use std::sync::Arc;

use reqwest::Client;
use tracing::debug;

use crate::providers::{AnthropicAdapter, GeminiAdapter, OpenAIAdapter};
use crate::registry::ProviderId;
use crate::traits::ProviderAdapter;

/// One adapter per provider, indexed by [`ProviderId`].
#[derive(Clone)]
pub struct AdapterSet {
    openai: Arc<dyn ProviderAdapter>,
    anthropic: Arc<dyn ProviderAdapter>,
    gemini: Arc<dyn ProviderAdapter>,
}

impl AdapterSet {
    /// Adapter serving `id`.
    pub fn get(&self, id: ProviderId) -> Arc<dyn ProviderAdapter> {
        match id {
            ProviderId::OpenAI => Arc::clone(&self.openai),
            ProviderId::Anthropic => Arc::clone(&self.anthropic),
            ProviderId::Gemini => Arc::clone(&self.gemini),
        }
    }

    /// Replace the adapter for `adapter.id()`.
    pub fn with(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        match adapter.id() {
            ProviderId::OpenAI => self.openai = adapter,
            ProviderId::Anthropic => self.anthropic = adapter,
            ProviderId::Gemini => self.gemini = adapter,
        }
        self
    }
}

impl Default for AdapterSet {
    fn default() -> Self {
        ProviderFactory::default_adapters()
    }
}

impl std::fmt::Debug for AdapterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterSet")
            .field("openai", &self.openai.display_name())
            .field("anthropic", &self.anthropic.display_name())
            .field("gemini", &self.gemini.display_name())
            .finish()
    }
}

/// Builds adapters over one shared HTTP client.
pub struct ProviderFactory;

impl ProviderFactory {
    /// Shared HTTP client. Timeouts are applied per request.
    pub fn http_client() -> Client {
        Client::new()
    }

    /// Create the adapter for `id`, optionally pointed at `base_url`.
    pub fn create(id: ProviderId, client: Client, base_url: Option<&str>) -> Arc<dyn ProviderAdapter> {
        match (id, base_url) {
            (ProviderId::OpenAI, None) => Arc::new(OpenAIAdapter::new(client)),
            (ProviderId::OpenAI, Some(url)) => Arc::new(OpenAIAdapter::new(client).with_base_url(url)),
            (ProviderId::Anthropic, None) => Arc::new(AnthropicAdapter::new(client)),
            (ProviderId::Anthropic, Some(url)) => Arc::new(AnthropicAdapter::new(client).with_base_url(url)),
            (ProviderId::Gemini, None) => Arc::new(GeminiAdapter::new(client)),
            (ProviderId::Gemini, Some(url)) => Arc::new(GeminiAdapter::new(client).with_base_url(url)),
        }
    }

    /// All three adapters against their public endpoints.
    pub fn default_adapters() -> AdapterSet {
        Self::with_base_urls(|_| None)
    }

    /// All three adapters, honouring `*_BASE_URL` environment overrides.
    pub fn from_env() -> AdapterSet {
        Self::with_base_urls(|id| {
            let var = match id {
                ProviderId::OpenAI => "OPENAI_BASE_URL",
                ProviderId::Anthropic => "ANTHROPIC_BASE_URL",
                ProviderId::Gemini => "GEMINI_BASE_URL",
            };
            let url = std::env::var(var).ok().filter(|v| !v.trim().is_empty());
            if let Some(url) = &url {
                debug!(provider = %id, base_url = %url, "Using base URL override");
            }
            url
        })
    }

    fn with_base_urls(base_url: impl Fn(ProviderId) -> Option<String>) -> AdapterSet {
        let client = Self::http_client();
        let build = |id| Self::create(id, client.clone(), base_url(id).as_deref());
        AdapterSet {
            openai: build(ProviderId::OpenAI),
            anthropic: build(ProviderId::Anthropic),
            gemini: build(ProviderId::Gemini),
        }
    }
}
