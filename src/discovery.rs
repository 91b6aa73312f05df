//! Model discovery and caching.
//!
//! Populates the model picker; never on the send path.
//!
//! ```text
//! get_models(provider, key, force)
//!   │
//!   ├─ cache fresh (< 24h) and !force ──────────────▶ cached
//!   ├─ no key ─▶ cached, or static list (stored)
//!   └─ adapter.list_models(key)
//!        ├─ Ok(non-empty) ─▶ store remote entry ──▶ remote
//!        ├─ Ok(empty)     ─▶ cached, or static (not stored)
//!        ├─ Cancelled     ─▶ cached (may be none)
//!        └─ Err(_)        ─▶ cached, or static (not stored)
//! ```

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::factory::AdapterSet;
use crate::registry::{static_models, ModelItem, ProviderId};
use crate::sanitize::debug_event;
use crate::traits::AdapterError;

/// How long a cached listing stays fresh.
pub const MODEL_CACHE_TTL_HOURS: i64 = 24;

/// Where a cache entry's items came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSource {
    Remote,
    Static,
}

/// One provider's model listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCacheEntry {
    pub fetched_at: DateTime<Utc>,
    pub items: Vec<ModelItem>,
    pub source: ModelSource,
}

impl ModelCacheEntry {
    pub fn new(items: Vec<ModelItem>, source: ModelSource) -> Self {
        Self {
            fetched_at: Utc::now(),
            items,
            source,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now())
    }

    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now - self.fetched_at < Duration::hours(MODEL_CACHE_TTL_HOURS)
    }
}

/// Per-provider cache in front of the adapters' listing endpoints.
#[derive(Debug)]
pub struct ModelCatalog {
    adapters: AdapterSet,
    cache: RwLock<HashMap<ProviderId, ModelCacheEntry>>,
}

impl ModelCatalog {
    pub fn new(adapters: AdapterSet) -> Self {
        Self {
            adapters,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Current cache entry, fresh or not.
    pub fn cached(&self, provider: ProviderId) -> Option<ModelCacheEntry> {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).get(&provider).cloned()
    }

    /// Restore a previously persisted entry.
    pub fn seed(&self, provider: ProviderId, entry: ModelCacheEntry) {
        self.cache.write().unwrap_or_else(PoisonError::into_inner).insert(provider, entry);
    }

    pub fn invalidate(&self, provider: ProviderId) {
        self.cache.write().unwrap_or_else(PoisonError::into_inner).remove(&provider);
    }

    /// Resolve the model list for `provider`; see the module diagram.
    #[instrument(skip(self, api_key, cancel), fields(provider = %provider))]
    pub async fn get_models(
        &self,
        provider: ProviderId,
        api_key: Option<&str>,
        force: bool,
        cancel: &CancellationToken,
    ) -> Option<ModelCacheEntry> {
        let cached = self.cached(provider);

        if !force {
            if let Some(entry) = cached.as_ref().filter(|e| e.is_fresh()) {
                return Some(entry.clone());
            }
        }

        let api_key = match api_key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => key,
            None => {
                if cached.is_some() {
                    return cached;
                }
                let entry = static_entry(provider)?;
                self.seed(provider, entry.clone());
                return Some(entry);
            }
        };

        let adapter = self.adapters.get(provider);
        match adapter.list_models(api_key, cancel).await {
            Ok(items) if !items.is_empty() => {
                debug!(count = items.len(), "Fetched model list");
                let entry = ModelCacheEntry::new(items, ModelSource::Remote);
                self.seed(provider, entry.clone());
                Some(entry)
            }
            Ok(_) => cached.or_else(|| static_entry(provider)),
            Err(AdapterError::Cancelled) => cached,
            Err(err) => {
                let err = err.normalize_with(|raw| adapter.normalize_error(raw));
                if let AdapterError::Normalized(e) = &err {
                    debug_event(
                        "Model listing failed",
                        &serde_json::json!({
                            "provider": provider.as_str(),
                            "errorKind": e.kind.as_str(),
                            "status": e.status,
                        }),
                    );
                }
                cached.or_else(|| static_entry(provider))
            }
        }
    }
}

fn static_entry(provider: ProviderId) -> Option<ModelCacheEntry> {
    let items = static_models(provider);
    if items.is_empty() {
        return None;
    }
    Some(ModelCacheEntry::new(items, ModelSource::Static))
}
