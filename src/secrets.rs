//! Credential storage seams.
//!
//! Keys live in a [`SecretStore`] (OS keychain, host secret API, ...). Older
//! installs kept the OpenAI key in a plain settings bag; [`LegacyKeyStore`]
//! exposes that bag so the router can migrate the key forward once.
//!
//! Only in-memory implementations ship here; hosts plug in their own.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use thiserror::Error;

/// Legacy location of the OpenAI key.
pub const LEGACY_OPENAI_KEY: &str = "openaiApiKey";

/// Secret or legacy store failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Secret storage unavailable: {0}")]
    Unavailable(String),

    #[error("Secret storage operation failed: {0}")]
    Failed(String),
}

impl StoreError {
    /// Short machine-readable code, safe for debug logs.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Unavailable(_) => "unavailable",
            StoreError::Failed(_) => "failed",
        }
    }
}

/// Async keyed secret storage.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn store(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Plain key/value bag that may still hold a pre-migration key.
#[async_trait]
pub trait LegacyKeyStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

// ============================================================================
// In-memory implementations
// ============================================================================

/// Secret store held in process memory.
///
/// Can be switched into a failing mode to exercise the session-only fallback.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    values: RwLock<HashMap<String, String>>,
    unavailable: AtomicBool,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every operation fails.
    pub fn unavailable() -> Self {
        let store = Self::default();
        store.set_available(false);
        store
    }

    pub fn with(self, key: &str, value: &str) -> Self {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Raw stored value, bypassing availability.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.values.read().unwrap_or_else(PoisonError::into_inner).get(key).cloned()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("secret store disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        Ok(self.peek(key))
    }

    async fn store(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check()?;
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.values.write().unwrap_or_else(PoisonError::into_inner).remove(key);
        Ok(())
    }
}

/// Legacy bag held in process memory.
#[derive(Debug, Default)]
pub struct MemoryLegacyStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryLegacyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: &str, value: &str) -> Self {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.read().unwrap_or_else(PoisonError::into_inner).contains_key(key)
    }
}

#[async_trait]
impl LegacyKeyStore for MemoryLegacyStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().unwrap_or_else(PoisonError::into_inner).get(key).cloned()
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values.write().unwrap_or_else(PoisonError::into_inner).remove(key);
        Ok(())
    }
}
