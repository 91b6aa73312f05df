//! Configuration store.
//!
//! The router reads its settings at send time through [`ConfigStore`] and
//! never caches them. Two stores are provided:
//!
//! - [`MemoryConfig`]: process-local map, for tests and embedding hosts
//! - [`TomlConfig`]: a `gpthelper.toml` file, rewritten on every update
//!
//! # Keys
//!
//! | Key | Type | Meaning |
//! |-----|------|---------|
//! | `provider` | string | active provider id |
//! | `openai.model` / `anthropic.model` / `gemini.model` | string | per-provider model id |
//! | `maxOutputTokens` | integer | 0 = provider default/max |
//!
//! # Configuration File Location
//!
//! [`TomlConfig::load`] looks in order at:
//! 1. `GPTHELPER_CONFIG` environment variable
//! 2. `./gpthelper.toml` (current working directory)
//! 3. `~/.gpthelper/config.toml` (user config)
//! 4. Built-in defaults (nothing set, not persisted)
//!
//! # Example Configuration
//!
//! ```toml
//! provider = "anthropic"
//! maxOutputTokens = 0
//!
//! [anthropic]
//! model = "claude-opus-4-1-20250805"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::registry::{is_valid_provider_id, ProviderId};

/// Setting keys that are not per-provider.
pub mod keys {
    /// Active provider id.
    pub const PROVIDER: &str = "provider";
    /// Output token budget (0 = provider default).
    pub const MAX_OUTPUT_TOKENS: &str = "maxOutputTokens";
}

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "GPTHELPER_CONFIG";

// ============================================================================
// Error Types
// ============================================================================

/// Errors from reading or writing settings.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// Failed to read or write the config file.
    #[error("Failed to access config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse or render TOML.
    #[error("Failed to parse TOML config: {0}")]
    ParseError(String),

    /// A value was rejected.
    #[error("Invalid setting: {0}")]
    ValidationError(String),

    /// The key is not one this store knows.
    #[error("Unknown setting key: {0}")]
    UnknownKey(String),
}

// ============================================================================
// Values and the store trait
// ============================================================================

/// A value written to a [`ConfigStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingValue {
    Text(String),
    Integer(i64),
}

impl From<&str> for SettingValue {
    fn from(v: &str) -> Self {
        SettingValue::Text(v.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(v: String) -> Self {
        SettingValue::Text(v)
    }
}

impl From<i64> for SettingValue {
    fn from(v: i64) -> Self {
        SettingValue::Integer(v)
    }
}

/// Read/write access to persistent settings.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// String value for `key`, if set.
    fn get_string(&self, key: &str) -> Option<String>;

    /// Integer value for `key`, if set and numeric.
    fn get_i64(&self, key: &str) -> Option<i64>;

    /// Persist `value` under `key`.
    async fn update(&self, key: &str, value: SettingValue) -> Result<(), SettingsError>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// Settings held in process memory.
#[derive(Debug, Default)]
pub struct MemoryConfig {
    values: RwLock<HashMap<String, SettingValue>>,
}

impl MemoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style preset.
    pub fn with(self, key: &str, value: impl Into<SettingValue>) -> Self {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.into());
        self
    }
}

#[async_trait]
impl ConfigStore for MemoryConfig {
    fn get_string(&self, key: &str) -> Option<String> {
        match self.values.read().unwrap_or_else(PoisonError::into_inner).get(key)? {
            SettingValue::Text(s) => Some(s.clone()),
            SettingValue::Integer(n) => Some(n.to_string()),
        }
    }

    fn get_i64(&self, key: &str) -> Option<i64> {
        match self.values.read().unwrap_or_else(PoisonError::into_inner).get(key)? {
            SettingValue::Integer(n) => Some(*n),
            SettingValue::Text(s) => s.trim().parse().ok(),
        }
    }

    async fn update(&self, key: &str, value: SettingValue) -> Result<(), SettingsError> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
        Ok(())
    }
}

// ============================================================================
// TOML file store
// ============================================================================

/// Per-provider table in the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ProviderSection {
    fn is_empty(&self) -> bool {
        self.model.is_none()
    }
}

/// On-disk shape of `gpthelper.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(default, rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<i64>,

    #[serde(default, skip_serializing_if = "ProviderSection::is_empty")]
    pub openai: ProviderSection,

    #[serde(default, skip_serializing_if = "ProviderSection::is_empty")]
    pub anthropic: ProviderSection,

    #[serde(default, skip_serializing_if = "ProviderSection::is_empty")]
    pub gemini: ProviderSection,
}

impl SettingsFile {
    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, SettingsError> {
        toml::from_str(toml_str).map_err(|e| SettingsError::ParseError(e.to_string()))
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String, SettingsError> {
        toml::to_string_pretty(self).map_err(|e| SettingsError::ParseError(e.to_string()))
    }

    fn section(&self, provider: ProviderId) -> &ProviderSection {
        match provider {
            ProviderId::OpenAI => &self.openai,
            ProviderId::Anthropic => &self.anthropic,
            ProviderId::Gemini => &self.gemini,
        }
    }

    fn section_mut(&mut self, provider: ProviderId) -> &mut ProviderSection {
        match provider {
            ProviderId::OpenAI => &mut self.openai,
            ProviderId::Anthropic => &mut self.anthropic,
            ProviderId::Gemini => &mut self.gemini,
        }
    }

    fn model_key_provider(key: &str) -> Option<ProviderId> {
        ProviderId::ALL.into_iter().find(|p| p.model_setting_key() == key)
    }

    fn get_string(&self, key: &str) -> Option<String> {
        match key {
            keys::PROVIDER => self.provider.clone(),
            keys::MAX_OUTPUT_TOKENS => self.max_output_tokens.map(|n| n.to_string()),
            _ => Self::model_key_provider(key).and_then(|p| self.section(p).model.clone()),
        }
    }

    fn set(&mut self, key: &str, value: SettingValue) -> Result<(), SettingsError> {
        match (key, value) {
            (keys::PROVIDER, SettingValue::Text(id)) => {
                if !is_valid_provider_id(&id) {
                    return Err(SettingsError::ValidationError(format!("unknown provider '{id}'")));
                }
                self.provider = Some(id);
            }
            (keys::MAX_OUTPUT_TOKENS, SettingValue::Integer(n)) => self.max_output_tokens = Some(n),
            (keys::MAX_OUTPUT_TOKENS, SettingValue::Text(s)) => {
                let n = s
                    .trim()
                    .parse()
                    .map_err(|_| SettingsError::ValidationError(format!("'{s}' is not an integer")))?;
                self.max_output_tokens = Some(n);
            }
            (key, value) => {
                let provider =
                    Self::model_key_provider(key).ok_or_else(|| SettingsError::UnknownKey(key.to_string()))?;
                let model = match value {
                    SettingValue::Text(s) => s,
                    SettingValue::Integer(_) => {
                        return Err(SettingsError::ValidationError(format!("{key} must be a string")));
                    }
                };
                self.section_mut(provider).model = Some(model);
            }
        }
        Ok(())
    }
}

/// Settings backed by a TOML file.
#[derive(Debug, Default)]
pub struct TomlConfig {
    path: Option<PathBuf>,
    doc: RwLock<SettingsFile>,
}

impl TomlConfig {
    /// Load from the first config file found, else built-in defaults.
    ///
    /// With defaults nothing is persisted until [`TomlConfig::with_path`].
    pub fn load() -> Result<Self, SettingsError> {
        // Check environment variable first
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if Path::new(&path).exists() {
                return Self::from_file(&path);
            }
        }

        let local_path = Path::new("gpthelper.toml");
        if local_path.exists() {
            return Self::from_file(local_path);
        }

        if let Some(home) = dirs::home_dir() {
            let user_path = home.join(".gpthelper").join("config.toml");
            if user_path.exists() {
                return Self::from_file(&user_path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file; updates are written back to it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "Loaded settings file");
        Ok(Self {
            path: Some(path.to_path_buf()),
            doc: RwLock::new(SettingsFile::from_toml(&content)?),
        })
    }

    /// Parse configuration from a TOML string, without a backing file.
    pub fn from_toml(toml_str: &str) -> Result<Self, SettingsError> {
        Ok(Self {
            path: None,
            doc: RwLock::new(SettingsFile::from_toml(toml_str)?),
        })
    }

    /// Persist future updates to `path`.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Snapshot of the current document.
    pub fn snapshot(&self) -> SettingsFile {
        self.doc.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Save the current document to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        std::fs::write(path.as_ref(), self.snapshot().to_toml()?)?;
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for TomlConfig {
    fn get_string(&self, key: &str) -> Option<String> {
        self.doc.read().unwrap_or_else(PoisonError::into_inner).get_string(key)
    }

    fn get_i64(&self, key: &str) -> Option<i64> {
        if key == keys::MAX_OUTPUT_TOKENS {
            return self.doc.read().unwrap_or_else(PoisonError::into_inner).max_output_tokens;
        }
        self.get_string(key)?.trim().parse().ok()
    }

    async fn update(&self, key: &str, value: SettingValue) -> Result<(), SettingsError> {
        let rendered = {
            let mut doc = self.doc.write().unwrap_or_else(PoisonError::into_inner);
            doc.set(key, value)?;
            doc.to_toml()?
        };

        if let Some(path) = &self.path {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, rendered).await?;
            debug!(key, path = %path.display(), "Persisted setting");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[tokio::test]
    async fn test_memory_config_roundtrip() {
        let config = MemoryConfig::new().with(keys::PROVIDER, "gemini");
        assert_eq!(config.get_string(keys::PROVIDER).as_deref(), Some("gemini"));
        config.update(keys::MAX_OUTPUT_TOKENS, 512.into()).await.unwrap();
        assert_eq!(config.get_i64(keys::MAX_OUTPUT_TOKENS), Some(512));
        assert_eq!(config.get_i64("missing"), None);
    }

    #[test]
    fn test_memory_config_numeric_text() {
        let config = MemoryConfig::new().with(keys::MAX_OUTPUT_TOKENS, " 42 ");
        assert_eq!(config.get_i64(keys::MAX_OUTPUT_TOKENS), Some(42));
    }

    #[test]
    fn test_parse_settings_file() {
        let toml = r#"
provider = "anthropic"
maxOutputTokens = 2048

[anthropic]
model = "claude-opus-4-1-20250805"
"#;
        let config = TomlConfig::from_toml(toml).unwrap();
        assert_eq!(config.get_string(keys::PROVIDER).as_deref(), Some("anthropic"));
        assert_eq!(config.get_i64(keys::MAX_OUTPUT_TOKENS), Some(2048));
        assert_eq!(
            config.get_string("anthropic.model").as_deref(),
            Some("claude-opus-4-1-20250805")
        );
        assert_eq!(config.get_string("openai.model"), None);
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            TomlConfig::from_toml("provider = ["),
            Err(SettingsError::ParseError(_))
        ));
    }

    #[test]
    fn test_empty_sections_not_serialized() {
        let doc = SettingsFile {
            provider: Some("openai".into()),
            ..Default::default()
        };
        let rendered = doc.to_toml().unwrap();
        assert_eq!(rendered.trim(), "provider = \"openai\"");
    }

    #[tokio::test]
    async fn test_update_validates() {
        let config = TomlConfig::default();
        assert!(matches!(
            config.update(keys::PROVIDER, "mistral".into()).await,
            Err(SettingsError::ValidationError(_))
        ));
        assert!(matches!(
            config.update("bogus.key", "x".into()).await,
            Err(SettingsError::UnknownKey(_))
        ));
        assert!(matches!(
            config.update("gemini.model", 3.into()).await,
            Err(SettingsError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_update_persists_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("gpthelper.toml");
        let config = TomlConfig::default().with_path(&path);

        config.update("gemini.model", "gemini-2.5-pro".into()).await.unwrap();
        config.update(keys::MAX_OUTPUT_TOKENS, 0.into()).await.unwrap();

        let reloaded = TomlConfig::from_file(&path).unwrap();
        assert_eq!(reloaded.get_string("gemini.model").as_deref(), Some("gemini-2.5-pro"));
        assert_eq!(reloaded.get_i64(keys::MAX_OUTPUT_TOKENS), Some(0));
    }

    #[test]
    #[serial]
    fn test_load_from_env_var() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "provider = \"gemini\"\n").unwrap();

        std::env::set_var(CONFIG_ENV_VAR, &path);
        let config = TomlConfig::load().unwrap();
        std::env::remove_var(CONFIG_ENV_VAR);

        assert_eq!(config.get_string(keys::PROVIDER).as_deref(), Some("gemini"));
        assert_eq!(config.path(), Some(path.as_path()));
    }

    #[test]
    fn test_save_writes_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.toml");
        let config = TomlConfig::from_toml("[openai]\nmodel = \"gpt-4o\"\n").unwrap();
        config.save(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("[openai]"));
        assert!(text.contains("gpt-4o"));
    }
}
