//! Request router.
//!
//! [`LlmRouter`] is the single entry point the host calls. Per send it:
//!
//! ```text
//! ┌────────────┐   ┌────────────┐   ┌─────────────┐   ┌─────────┐   ┌──────────┐
//! │ credential │──▶│  payload   │──▶│  char cap   │──▶│ dispatch│──▶│ outcome  │
//! │   check    │   │   build    │   │ (1.5M chars)│   │         │   │          │
//! └────────────┘   └────────────┘   └─────────────┘   └────┬────┘   └──────────┘
//!                                                         │ ContextTooLarge,
//!                                                         │ first attempt only
//!                                                         ▼
//!                                                   shrink + re-cap ──▶ dispatch #2
//! ```
//!
//! Settings are read from the [`ConfigStore`] on every call. Keys come from a
//! session override map, then the [`SecretStore`], then (OpenAI only) the
//! legacy store, which is migrated forward on first read.
//!
//! A cancelled send resolves to `Ok(None)`; it is never an error and is never
//! retried.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::{ErrorKind, LlmError, Result};
use crate::factory::{AdapterSet, ProviderFactory};
use crate::providers::anthropic::DEFAULT_MAX_TOKENS as ANTHROPIC_DEFAULT_MAX_TOKENS;
use crate::registry::{default_model_id, known_max_output_tokens, ProviderId};
use crate::sanitize::debug_event;
use crate::secrets::{LegacyKeyStore, MemoryLegacyStore, SecretStore, StoreError, LEGACY_OPENAI_KEY};
use crate::settings::{keys, ConfigStore, SettingValue, SettingsError};
use crate::sizing::{char_len, count_request_chars, truncate_head_tail, TruncateOptions};
use crate::traits::{AdapterError, ChatMessage, ChatRole, HistoryEntry, SendArgs, Usage};

/// Shown once per router when the payload had to be trimmed.
pub const TRUNCATION_WARNING: &str =
    "Input was truncated to fit safety limits (large selection/file or extensive history).";

/// Shown once per router when Anthropic receives both sampling knobs.
pub const SAMPLING_CONFLICT_WARNING: &str = "Anthropic models do not support using both temperature and top-p. \
     This request will use temperature and ignore top-p.";

/// Shown once per router when the secret store fails.
pub const SECRET_STORAGE_WARNING: &str = "Unable to access secret storage. API keys cannot be loaded or saved.";

// ============================================================================
// Limits and context
// ============================================================================

/// Size heuristics applied before and during the oversized-context retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterLimits {
    /// Ceiling on system + message characters per request.
    pub hard_char_cap: usize,
    /// History messages kept on the retry.
    pub retry_history_tail: usize,
    /// User prompt ceiling on the retry.
    pub retry_user_chars: usize,
}

impl Default for RouterLimits {
    fn default() -> Self {
        Self {
            hard_char_cap: 1_500_000,
            retry_history_tail: 6,
            retry_user_chars: 200_000,
        }
    }
}

/// User-facing warning sink.
pub type WarnFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Everything the router depends on, passed in explicitly.
#[derive(Clone)]
pub struct RouterContext {
    pub config: Arc<dyn ConfigStore>,
    pub secrets: Arc<dyn SecretStore>,
    pub legacy: Arc<dyn LegacyKeyStore>,
    pub warn: WarnFn,
    pub adapters: AdapterSet,
    pub limits: RouterLimits,
}

impl RouterContext {
    /// Context over the given stores, with env-configured adapters, no legacy
    /// keys and a warn sink that only logs.
    pub fn new(config: Arc<dyn ConfigStore>, secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            config,
            secrets,
            legacy: Arc::new(MemoryLegacyStore::new()),
            warn: Arc::new(|msg: &str| warn!("{}", msg)),
            adapters: ProviderFactory::from_env(),
            limits: RouterLimits::default(),
        }
    }

    pub fn with_legacy(mut self, legacy: Arc<dyn LegacyKeyStore>) -> Self {
        self.legacy = legacy;
        self
    }

    pub fn with_warn(mut self, warn: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.warn = Arc::new(warn);
        self
    }

    pub fn with_adapters(mut self, adapters: AdapterSet) -> Self {
        self.adapters = adapters;
        self
    }

    pub fn with_limits(mut self, limits: RouterLimits) -> Self {
        self.limits = limits;
        self
    }
}

impl fmt::Debug for RouterContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterContext")
            .field("adapters", &self.adapters)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Request / outcome
// ============================================================================

/// How much prior conversation goes with a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContextMode {
    #[default]
    None,
    LastN,
    Full,
}

impl ContextMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextMode::None => "none",
            ContextMode::LastN => "lastN",
            ContextMode::Full => "full",
        }
    }
}

/// One call to [`LlmRouter::send`].
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    pub user_prompt: String,
    /// Resolved project instruction text, if any.
    pub system: String,
    /// Full history; the router filters it by provider.
    pub history: Vec<HistoryEntry>,
    pub context_mode: ContextMode,
    /// N for [`ContextMode::LastN`].
    pub context_length: usize,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub cancel: CancellationToken,
}

impl SendRequest {
    pub fn new(user_prompt: impl Into<String>) -> Self {
        Self {
            user_prompt: user_prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    pub fn with_history(mut self, history: Vec<HistoryEntry>) -> Self {
        self.history = history;
        self
    }

    pub fn with_context(mut self, mode: ContextMode, length: usize) -> Self {
        self.context_mode = mode;
        self.context_length = length;
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
}

/// Successful send.
#[derive(Debug, Clone, PartialEq)]
pub struct SendOutcome {
    pub text: String,
    pub provider: ProviderId,
    pub model: String,
    pub request_id: Option<String>,
    pub usage: Option<Usage>,
}

/// Result of storing or removing a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyUpdate {
    /// `false` means the change lives only in this session.
    pub persisted: bool,
}

// ============================================================================
// Pure payload helpers
// ============================================================================

/// Output-token budget after applying the provider's rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaxTokensResolution {
    /// Value to send; `None` omits the field.
    pub resolved: Option<u32>,
    /// Original setting when it was clamped to a known ceiling.
    pub clamped_from: Option<i64>,
}

/// Turn the `maxOutputTokens` setting into the value sent upstream.
///
/// 0 means "provider default": the known ceiling for OpenAI (or omitted),
/// 1024 for Anthropic (required field), omitted for Gemini.
pub fn resolve_max_output_tokens(provider: ProviderId, model: &str, setting: i64) -> Result<MaxTokensResolution> {
    if setting < 0 {
        return Err(LlmError::new(
            ErrorKind::InvalidRequest,
            provider,
            "maxOutputTokens must be >= 0.",
        ));
    }

    let known_max = known_max_output_tokens(provider, model);

    if setting == 0 {
        let resolved = match provider {
            ProviderId::OpenAI => known_max,
            ProviderId::Anthropic => Some(ANTHROPIC_DEFAULT_MAX_TOKENS),
            ProviderId::Gemini => None,
        };
        return Ok(MaxTokensResolution {
            resolved,
            clamped_from: None,
        });
    }

    match known_max {
        Some(max) if setting > i64::from(max) => Ok(MaxTokensResolution {
            resolved: Some(max),
            clamped_from: Some(setting),
        }),
        _ => Ok(MaxTokensResolution {
            resolved: Some(u32::try_from(setting).unwrap_or(u32::MAX)),
            clamped_from: None,
        }),
    }
}

/// History after provider isolation and context-mode selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistorySelection {
    pub messages: Vec<ChatMessage>,
    /// Leading assistant turns removed.
    pub dropped_leading: usize,
}

/// Pick the history to send for `provider`.
///
/// Only entries recorded against `provider` are considered; the selection
/// never starts with an assistant turn.
pub fn select_history(
    history: &[HistoryEntry],
    provider: ProviderId,
    mode: ContextMode,
    context_length: usize,
) -> HistorySelection {
    let own: Vec<&HistoryEntry> = history.iter().filter(|e| e.provider == provider).collect();

    let slice: &[&HistoryEntry] = match mode {
        ContextMode::None => &[],
        ContextMode::Full => &own,
        ContextMode::LastN => &own[own.len().saturating_sub(context_length)..],
    };

    let mut messages: Vec<ChatMessage> = slice.iter().map(|e| e.to_message()).collect();
    let dropped_leading = drop_leading_assistant(&mut messages);
    HistorySelection {
        messages,
        dropped_leading,
    }
}

fn drop_leading_assistant(messages: &mut Vec<ChatMessage>) -> usize {
    let count = messages.iter().take_while(|m| m.role == ChatRole::Assistant).count();
    messages.drain(..count);
    count
}

/// What the cap had to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapMeta {
    pub dropped_history: usize,
    pub truncated_user: bool,
    pub truncated_system: bool,
    pub total_chars_before: usize,
    pub total_chars_after: usize,
}

impl CapMeta {
    pub fn trimmed(&self) -> bool {
        self.dropped_history > 0 || self.truncated_user || self.truncated_system
    }
}

/// Payload that fits the cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CappedPayload {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub meta: CapMeta,
}

/// Fit `system` + `messages` under `cap` characters.
///
/// The last message is the user prompt and is never dropped. Oldest history
/// goes first, then the prompt is head/tail truncated, then the system text.
pub fn enforce_char_cap(system: &str, messages: Vec<ChatMessage>, cap: usize) -> CappedPayload {
    let mut system = system.to_string();
    let mut messages = messages;
    let before = count_request_chars(&system, &messages).total_chars;
    let opts = TruncateOptions::default();

    let mut dropped_history = 0;
    while messages.len() > 1 && count_request_chars(&system, &messages).total_chars > cap {
        messages.remove(0);
        dropped_history += 1;
    }
    if messages.len() > 1 {
        dropped_history += drop_leading_assistant(&mut messages);
    }

    let mut truncated_user = false;
    if let Some((user, earlier)) = messages.split_last_mut() {
        let other = count_request_chars(&system, earlier).total_chars;
        let available = cap.saturating_sub(other);
        if char_len(&user.content) > available {
            user.content = truncate_head_tail(&user.content, available, &opts).text;
            truncated_user = true;
        }
    }

    let mut truncated_system = false;
    let available = cap.saturating_sub(count_request_chars("", &messages).total_chars);
    if char_len(&system) > available {
        system = truncate_head_tail(&system, available, &opts).text;
        truncated_system = true;
    }

    let after = count_request_chars(&system, &messages).total_chars;
    CappedPayload {
        system,
        messages,
        meta: CapMeta {
            dropped_history,
            truncated_user,
            truncated_system,
            total_chars_before: before,
            total_chars_after: after,
        },
    }
}

/// Sampling values actually sent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SamplingParams {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    /// Both were set for a provider that accepts only one.
    pub conflict: bool,
}

/// Anthropic takes temperature or top-p, not both; temperature wins.
pub fn normalize_sampling(provider: ProviderId, temperature: Option<f32>, top_p: Option<f32>) -> SamplingParams {
    match (provider, temperature, top_p) {
        (ProviderId::Anthropic, Some(t), Some(_)) => SamplingParams {
            temperature: Some(t),
            top_p: None,
            conflict: true,
        },
        _ => SamplingParams {
            temperature,
            top_p,
            conflict: false,
        },
    }
}

// ============================================================================
// Router
// ============================================================================

/// Routes requests to the configured provider.
pub struct LlmRouter {
    ctx: RouterContext,
    session_keys: Mutex<HashMap<ProviderId, String>>,
    warned_truncation: AtomicBool,
    warned_secret_storage: AtomicBool,
    warned_sampling: AtomicBool,
}

impl fmt::Debug for LlmRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmRouter").field("ctx", &self.ctx).finish_non_exhaustive()
    }
}

impl LlmRouter {
    pub fn new(ctx: RouterContext) -> Self {
        Self {
            ctx,
            session_keys: Mutex::new(HashMap::new()),
            warned_truncation: AtomicBool::new(false),
            warned_secret_storage: AtomicBool::new(false),
            warned_sampling: AtomicBool::new(false),
        }
    }

    pub fn limits(&self) -> RouterLimits {
        self.ctx.limits
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    /// Configured provider; unknown values fall back to OpenAI.
    pub fn active_provider_id(&self) -> ProviderId {
        ProviderId::resolve(self.ctx.config.get_string(keys::PROVIDER).as_deref())
    }

    pub fn provider_display_name(&self, provider: ProviderId) -> String {
        self.ctx.adapters.get(provider).display_name().to_string()
    }

    /// Configured model for `provider`, or its default.
    pub fn model(&self, provider: ProviderId) -> String {
        self.ctx
            .config
            .get_string(provider.model_setting_key())
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| default_model_id(provider).to_string())
    }

    /// Raw `maxOutputTokens` setting (0 when unset).
    pub fn max_output_tokens_setting(&self, _provider: ProviderId) -> i64 {
        self.ctx.config.get_i64(keys::MAX_OUTPUT_TOKENS).unwrap_or(0)
    }

    pub async fn set_provider(&self, provider: ProviderId) -> Result<()> {
        self.update_setting(provider, keys::PROVIDER, provider.as_str().into()).await
    }

    pub async fn set_model(&self, provider: ProviderId, model_id: &str) -> Result<()> {
        self.update_setting(provider, provider.model_setting_key(), model_id.trim().into())
            .await
    }

    pub async fn set_max_output_tokens(&self, value: i64) -> Result<()> {
        let provider = self.active_provider_id();
        if value < 0 {
            return Err(LlmError::new(
                ErrorKind::InvalidRequest,
                provider,
                "maxOutputTokens must be >= 0.",
            ));
        }
        self.update_setting(provider, keys::MAX_OUTPUT_TOKENS, value.into()).await
    }

    async fn update_setting(&self, provider: ProviderId, key: &str, value: SettingValue) -> Result<()> {
        self.ctx.config.update(key, value).await.map_err(|e| settings_error(provider, key, e))
    }

    // ------------------------------------------------------------------
    // Credentials
    // ------------------------------------------------------------------

    /// Session key, then stored key, then (OpenAI) the migrated legacy key.
    pub async fn api_key(&self, provider: ProviderId) -> Option<String> {
        if let Some(key) = self.session_key(provider) {
            return Some(key);
        }

        match self.ctx.secrets.get(provider.secret_key()).await {
            Ok(Some(key)) if !key.trim().is_empty() => return Some(key.trim().to_string()),
            Ok(_) => {}
            Err(e) => self.secret_storage_failed("SecretStorage: get failed", provider, &e),
        }

        if provider == ProviderId::OpenAI {
            return self.migrate_legacy_key().await;
        }
        None
    }

    async fn migrate_legacy_key(&self) -> Option<String> {
        let legacy = self.ctx.legacy.get(LEGACY_OPENAI_KEY)?;
        let legacy = legacy.trim();
        if legacy.is_empty() {
            return None;
        }

        match self.ctx.secrets.store(ProviderId::OpenAI.secret_key(), legacy).await {
            Ok(()) => {
                self.clear_legacy_key().await;
                debug!("Migrated legacy OpenAI key to secret storage");
            }
            Err(e) => self.secret_storage_failed("API key migration failed", ProviderId::OpenAI, &e),
        }
        Some(legacy.to_string())
    }

    /// Store a key for this session and, when possible, in secret storage.
    pub async fn set_api_key(&self, provider: ProviderId, api_key: &str) -> Result<KeyUpdate> {
        let key = api_key.trim();
        if key.is_empty() {
            return Err(LlmError::new(ErrorKind::InvalidRequest, provider, "API key is empty."));
        }

        self.lock_session_keys().insert(provider, key.to_string());

        let persisted = match self.ctx.secrets.store(provider.secret_key(), key).await {
            Ok(()) => true,
            Err(e) => {
                self.secret_storage_failed("SecretStorage: store failed", provider, &e);
                false
            }
        };

        if persisted && provider == ProviderId::OpenAI {
            self.clear_legacy_key().await;
        }
        Ok(KeyUpdate { persisted })
    }

    /// Forget the key for `provider` everywhere it may be held.
    pub async fn remove_api_key(&self, provider: ProviderId) -> KeyUpdate {
        self.lock_session_keys().remove(&provider);

        let persisted = match self.ctx.secrets.delete(provider.secret_key()).await {
            Ok(()) => true,
            Err(e) => {
                self.secret_storage_failed("SecretStorage: delete failed", provider, &e);
                false
            }
        };

        if provider == ProviderId::OpenAI {
            self.clear_legacy_key().await;
        }
        KeyUpdate { persisted }
    }

    fn session_key(&self, provider: ProviderId) -> Option<String> {
        self.lock_session_keys()
            .get(&provider)
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }

    fn lock_session_keys(&self) -> std::sync::MutexGuard<'_, HashMap<ProviderId, String>> {
        self.session_keys.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn clear_legacy_key(&self) {
        if let Err(e) = self.ctx.legacy.remove(LEGACY_OPENAI_KEY).await {
            debug_event("Legacy key cleanup failed", &json!({ "code": e.code() }));
        }
    }

    fn secret_storage_failed(&self, event: &str, provider: ProviderId, err: &StoreError) {
        self.warn_once(&self.warned_secret_storage, SECRET_STORAGE_WARNING);
        debug_event(event, &json!({ "provider": provider.as_str(), "code": err.code() }));
    }

    fn warn_once(&self, flag: &AtomicBool, message: &str) {
        if !flag.swap(true, Ordering::SeqCst) {
            (self.ctx.warn)(message);
        }
    }

    // ------------------------------------------------------------------
    // Send
    // ------------------------------------------------------------------

    /// Send `request` to the active provider.
    ///
    /// Returns `Ok(None)` when cancelled. Retries once, with a smaller
    /// payload, when the provider reports the context is too large.
    #[instrument(skip(self, request), fields(provider))]
    pub async fn send(&self, request: SendRequest) -> Result<Option<SendOutcome>> {
        let provider = self.active_provider_id();
        tracing::Span::current().record("provider", provider.as_str());

        let adapter = self.ctx.adapters.get(provider);
        let model = self.model(provider);

        let api_key = self.api_key(provider).await.ok_or_else(|| LlmError::missing_key(provider))?;

        let max_setting = self.max_output_tokens_setting(provider);
        let budget = resolve_max_output_tokens(provider, &model, max_setting)?;

        let selection = select_history(&request.history, provider, request.context_mode, request.context_length);
        let mut messages = selection.messages;
        messages.push(ChatMessage::user(request.user_prompt.as_str()));

        let pre_cap = count_request_chars(&request.system, &messages);
        let capped = enforce_char_cap(&request.system, messages, self.ctx.limits.hard_char_cap);
        if capped.meta.trimmed() {
            self.warn_once(&self.warned_truncation, TRUNCATION_WARNING);
        }

        let sampling = normalize_sampling(provider, request.temperature, request.top_p);
        if sampling.conflict {
            self.warn_once(&self.warned_sampling, SAMPLING_CONFLICT_WARNING);
        }

        let user_chars = char_len(&request.user_prompt);
        debug_event(
            "LLM request",
            &json!({
                "provider": provider.as_str(),
                "model": model,
                "contextMode": request.context_mode.as_str(),
                "contextLength": request.context_length,
                "droppedLeadingHistoryMessages": selection.dropped_leading,
                "maxOutputTokensSetting": max_setting,
                "resolvedMaxOutputTokens": budget.resolved,
                "clampedFrom": budget.clamped_from,
                "temperatureSent": sampling.temperature,
                "topPSent": sampling.top_p,
                "temperatureRaw": request.temperature,
                "topPRaw": request.top_p,
                "instructionChars": pre_cap.system_chars,
                "historyChars": pre_cap.messages_chars.saturating_sub(user_chars),
                "userChars": user_chars,
                "totalChars": pre_cap.total_chars,
                "totalCharsAfterCap": capped.meta.total_chars_after,
                "droppedHistory": capped.meta.dropped_history,
                "truncatedUser": capped.meta.truncated_user,
                "truncatedSystem": capped.meta.truncated_system,
            }),
        );

        let base = SendArgs::new(api_key, model.as_str(), Vec::new())
            .with_max_output_tokens(budget.resolved)
            .with_sampling(sampling.temperature, sampling.top_p)
            .with_cancel(request.cancel.clone());

        let mut payload = capped;
        let mut attempt = 1u8;
        loop {
            let args = SendArgs {
                system: payload.system.clone(),
                messages: payload.messages.clone(),
                ..base.clone()
            };

            let err = match adapter.send(args).await {
                Ok(result) => {
                    return Ok(Some(SendOutcome {
                        text: result.text,
                        provider,
                        model,
                        request_id: result.request_id,
                        usage: result.usage,
                    }));
                }
                Err(AdapterError::Cancelled) => return Ok(self.cancelled(provider, &model)),
                Err(_) if request.cancel.is_cancelled() => return Ok(self.cancelled(provider, &model)),
                Err(AdapterError::Normalized(e)) => e,
                Err(AdapterError::Raw(raw)) => adapter.normalize_error(&raw),
            };

            if attempt == 1 && err.kind == ErrorKind::ContextTooLarge {
                attempt += 1;
                let retry = self.shrink_for_retry(&payload);
                debug_event(
                    "Retrying after ContextTooLarge",
                    &json!({
                        "provider": provider.as_str(),
                        "model": model,
                        "attempt": attempt,
                        "originalTotalChars": payload.meta.total_chars_after,
                        "retryTotalChars": retry.meta.total_chars_after,
                        "retryDroppedHistory": retry.meta.dropped_history,
                        "retryTruncatedUser": retry.meta.truncated_user,
                    }),
                );
                payload = retry;
                continue;
            }

            debug_event(
                "LLM request failed",
                &json!({
                    "provider": provider.as_str(),
                    "model": model,
                    "attempt": attempt,
                    "errorKind": err.kind.as_str(),
                    "status": err.status,
                    "requestId": err.request_id,
                }),
            );
            return Err(err);
        }
    }

    /// Keep the last few history turns, cut the prompt, and re-cap.
    fn shrink_for_retry(&self, payload: &CappedPayload) -> CappedPayload {
        let limits = self.ctx.limits;
        let (history, user) = match payload.messages.split_last() {
            Some((user, history)) => (history, user.content.as_str()),
            None => (&payload.messages[..], ""),
        };

        let keep_from = history.len().saturating_sub(limits.retry_history_tail);
        let mut messages = history[keep_from..].to_vec();
        drop_leading_assistant(&mut messages);

        let user = truncate_head_tail(user, limits.retry_user_chars, &TruncateOptions::default()).text;
        messages.push(ChatMessage::user(user));

        enforce_char_cap(&payload.system, messages, limits.hard_char_cap)
    }

    fn cancelled(&self, provider: ProviderId, model: &str) -> Option<SendOutcome> {
        debug_event(
            "LLM request canceled",
            &json!({ "provider": provider.as_str(), "model": model }),
        );
        None
    }
}

fn settings_error(provider: ProviderId, key: &str, err: SettingsError) -> LlmError {
    let kind = match &err {
        SettingsError::ValidationError(_) | SettingsError::UnknownKey(_) => ErrorKind::InvalidRequest,
        SettingsError::IoError(_) | SettingsError::ParseError(_) => ErrorKind::Unknown,
    };
    debug!(key, error = %err, "Setting update failed");
    LlmError::new(kind, provider, "Failed to persist setting.")
}
