//! Normalized LLM error taxonomy.
//!
//! # Error Handling Philosophy
//!
//! Every provider speaks a different failure dialect. Adapters translate raw
//! HTTP failures into one [`LlmError`] whose [`ErrorKind`] comes from a closed
//! set, so callers never inspect provider payloads.
//!
//! | Kind | Typical cause | What the user should do |
//! |------|---------------|-------------------------|
//! | `Auth` | Missing/invalid key (401/403) | Set or update the API key |
//! | `RateLimit` | 429, quota exhausted | Wait `retry_after_sec` or check plan |
//! | `NotFoundModel` | Unknown model id | Pick a different model |
//! | `NotFoundEndpoint` | Wrong URL, proxy, firewall | Check connectivity |
//! | `InvalidRequest` | Rejected payload (400) | Change model or shrink prompt |
//! | `ContextTooLarge` | Input exceeds context window | Reduce input |
//! | `Network` | No response / timeout | Retry |
//! | `Unknown` | 5xx, overload, anything else | Retry, check debug log |
//!
//! Cancellation is deliberately absent: a cancelled request is not a failure
//! and travels through [`crate::traits::AdapterError::Cancelled`] instead.

use std::fmt;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use thiserror::Error;

use crate::registry::ProviderId;

/// Result type for router operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Request-id headers, checked in order.
pub const REQUEST_ID_HEADERS: [&str; 6] = [
    "x-request-id",
    "x-requestid",
    "request-id",
    "x-amzn-requestid",
    "x-amz-request-id",
    "openai-request-id",
];

/// Default hint for the set-key command.
pub const DEFAULT_SET_KEY_COMMAND: &str = "GPT: Manage API Keys";

/// Default hint for the change-model command.
pub const DEFAULT_CHANGE_MODEL_COMMAND: &str = "GPT: Change Model";

// ============================================================================
// Error Kind
// ============================================================================

/// Closed classification of provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Auth,
    RateLimit,
    NotFoundModel,
    NotFoundEndpoint,
    InvalidRequest,
    ContextTooLarge,
    Network,
    Unknown,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ErrorKind; 8] = [
        ErrorKind::Auth,
        ErrorKind::RateLimit,
        ErrorKind::NotFoundModel,
        ErrorKind::NotFoundEndpoint,
        ErrorKind::InvalidRequest,
        ErrorKind::ContextTooLarge,
        ErrorKind::Network,
        ErrorKind::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "Auth",
            Self::RateLimit => "RateLimit",
            Self::NotFoundModel => "NotFoundModel",
            Self::NotFoundEndpoint => "NotFoundEndpoint",
            Self::InvalidRequest => "InvalidRequest",
            Self::ContextTooLarge => "ContextTooLarge",
            Self::Network => "Network",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Normalized Error
// ============================================================================

/// The one error shape every adapter produces.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{provider} {kind}: {message}")]
pub struct LlmError {
    /// Classified failure kind.
    pub kind: ErrorKind,
    /// Provider the failure came from.
    pub provider: ProviderId,
    /// Short, content-free description.
    pub message: String,
    /// HTTP status, when a response arrived.
    pub status: Option<u16>,
    /// Provider error code/type/status string.
    pub provider_code: Option<String>,
    /// Seconds to wait, from a `Retry-After` header.
    pub retry_after_sec: Option<u64>,
    /// Provider request id, from response headers.
    pub request_id: Option<String>,
    /// Whether retrying the same request may succeed.
    pub is_retryable: Option<bool>,
}

impl LlmError {
    /// Create an error with only kind, provider and message set.
    pub fn new(kind: ErrorKind, provider: ProviderId, message: impl Into<String>) -> Self {
        Self {
            kind,
            provider,
            message: message.into(),
            status: None,
            provider_code: None,
            retry_after_sec: None,
            request_id: None,
            is_retryable: None,
        }
    }

    /// No credential is available for `provider`.
    pub fn missing_key(provider: ProviderId) -> Self {
        Self::new(ErrorKind::Auth, provider, "Missing API key.")
    }

    /// The request could not be sent because no response arrived.
    pub fn network(provider: ProviderId, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, provider, message).retryable(true)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_provider_code(mut self, code: Option<String>) -> Self {
        self.provider_code = code.filter(|c| !c.is_empty());
        self
    }

    pub fn with_retry_after(mut self, secs: Option<u64>) -> Self {
        self.retry_after_sec = secs;
        self
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.is_retryable = Some(retryable);
        self
    }

    /// Copy status, retry-after and request id from a failed response.
    pub fn with_response_meta(self, status: u16, headers: &HeaderMap) -> Self {
        self.with_status(status)
            .with_retry_after(parse_retry_after(headers))
            .with_request_id(extract_request_id(headers))
    }

    /// Whether the failure is transient.
    pub fn is_recoverable(&self) -> bool {
        self.is_retryable.unwrap_or(false)
    }

    /// Anthropic's "overloaded" condition (HTTP 529 or `overloaded_error`).
    pub fn is_overload(&self) -> bool {
        self.provider == ProviderId::Anthropic
            && (self.status == Some(529) || self.provider_code.as_deref() == Some("overloaded_error"))
    }

    /// Render a human-readable sentence plus an actionable hint.
    pub fn user_message(&self, ctx: &MessageContext<'_>) -> String {
        let model_suffix = ctx.model.map(|m| format!(" ({m})")).unwrap_or_default();
        let label = ctx.provider_label;
        let request_id = self.request_id.as_deref().filter(|id| !id.trim().is_empty());

        let mut lines: Vec<String> = Vec::with_capacity(3);

        if self.is_overload() {
            lines.push("Anthropic is temporarily overloaded.".to_string());
            match self.retry_after_sec {
                Some(secs) => lines.push(format!("Retry after ~{secs}s.")),
                None => lines.push("Try again in a moment.".to_string()),
            }
            if let Some(id) = request_id {
                lines.push(format!("Request ID: {id}"));
            }
            return lines.join(" ");
        }

        match self.kind {
            ErrorKind::Auth => {
                lines.push(format!("{label} API key is missing or invalid."));
                lines.push(format!("Run '{}' to set or update your API key.", ctx.set_key_command));
            }
            ErrorKind::NotFoundModel => {
                lines.push(format!("Model not available for {label}{model_suffix}."));
                lines.push(format!(
                    "Run '{}' to refresh the model list or select a different model.",
                    ctx.change_model_command
                ));
            }
            ErrorKind::NotFoundEndpoint => {
                lines.push(format!("{label} endpoint not found or unreachable."));
                lines.push("Check network connectivity, proxy settings, or corporate firewall rules.".to_string());
            }
            ErrorKind::ContextTooLarge => {
                lines.push(format!("Input is too large for {label}{model_suffix}."));
                lines.push("Reduce selection/file size, lower context mode, or lower max output tokens.".to_string());
            }
            ErrorKind::RateLimit => {
                lines.push(format!("{label} rate limit or quota exceeded."));
                match self.retry_after_sec {
                    Some(secs) => lines.push(format!("Retry after ~{secs}s.")),
                    None => lines.push("Retry later, or check your plan/quota in the provider dashboard.".to_string()),
                }
            }
            ErrorKind::Network => {
                lines.push(format!("Network error contacting {label}."));
                lines.push("Check connectivity and try again.".to_string());
            }
            ErrorKind::InvalidRequest => {
                lines.push(format!("Invalid request sent to {label}{model_suffix}."));
                lines.push(format!("Try '{}', or reduce prompt size.", ctx.change_model_command));
            }
            ErrorKind::Unknown => {
                lines.push(format!("{label} request failed{model_suffix}."));
                lines.push("Try again. If this persists, check the debug log for request metadata.".to_string());
            }
        }

        if let Some(id) = request_id {
            lines.push(format!("Request ID: {id}"));
        }

        lines.join(" ")
    }
}

/// Presentation context for [`LlmError::user_message`].
#[derive(Debug, Clone, Copy)]
pub struct MessageContext<'a> {
    pub provider_label: &'a str,
    pub model: Option<&'a str>,
    pub set_key_command: &'a str,
    pub change_model_command: &'a str,
}

impl<'a> MessageContext<'a> {
    pub fn new(provider_label: &'a str) -> Self {
        Self {
            provider_label,
            model: None,
            set_key_command: DEFAULT_SET_KEY_COMMAND,
            change_model_command: DEFAULT_CHANGE_MODEL_COMMAND,
        }
    }

    pub fn with_model(mut self, model: &'a str) -> Self {
        self.model = Some(model).filter(|m| !m.is_empty());
        self
    }

    pub fn with_commands(mut self, set_key: &'a str, change_model: &'a str) -> Self {
        self.set_key_command = set_key;
        self.change_model_command = change_model;
        self
    }
}

// ============================================================================
// Raw Transport Failures
// ============================================================================

/// A provider failure that has not been classified yet.
#[derive(Debug, Clone)]
pub enum RawFailure {
    /// The request went out but no response came back (connect error, timeout).
    NoResponse { message: String, timed_out: bool },
    /// The provider answered with a non-success status.
    Status {
        status: u16,
        headers: HeaderMap,
        body: String,
    },
}

impl RawFailure {
    /// Build from a transport error that carried no usable response.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::Status {
                status: status.as_u16(),
                headers: HeaderMap::new(),
                body: String::new(),
            },
            None => Self::NoResponse {
                message: err.to_string(),
                timed_out: err.is_timeout(),
            },
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::NoResponse { .. } => None,
        }
    }

    pub fn headers(&self) -> Option<&HeaderMap> {
        match self {
            Self::Status { headers, .. } => Some(headers),
            Self::NoResponse { .. } => None,
        }
    }
}

// Header values and bodies stay out of Display.
impl fmt::Display for RawFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoResponse { timed_out: true, .. } => f.write_str("request timed out"),
            Self::NoResponse { .. } => f.write_str("no response received"),
            Self::Status { status, .. } => write!(f, "HTTP {status}"),
        }
    }
}

// ============================================================================
// Header Helpers
// ============================================================================

/// Seconds to wait from a `Retry-After` header, relative to now.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    parse_retry_after_at(headers, Utc::now())
}

/// Seconds to wait from a `Retry-After` header, relative to `now`.
///
/// Accepts integer seconds (negative clamps to zero) or an HTTP date, which
/// becomes a non-negative whole-second delta rounded up.
pub fn parse_retry_after_at(headers: &HeaderMap, now: DateTime<Utc>) -> Option<u64> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }

    if let Some(secs) = leading_integer(raw) {
        return Some(secs.max(0) as u64);
    }

    let date = DateTime::parse_from_rfc2822(raw).ok()?;
    let delta_ms = (date.with_timezone(&Utc) - now).num_milliseconds();
    let delta_sec = (delta_ms as f64 / 1000.0).ceil();
    Some(delta_sec.max(0.0) as u64)
}

/// Leading decimal integer of `raw` (optional sign), e.g. `"12.5"` → 12.
fn leading_integer(raw: &str) -> Option<i64> {
    let (sign, digits) = match raw.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, raw.strip_prefix('+').unwrap_or(raw)),
    };
    let end = digits
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    digits[..end].parse::<i64>().ok().map(|n| n * sign)
}

/// First non-empty request id among [`REQUEST_ID_HEADERS`].
pub fn extract_request_id(headers: &HeaderMap) -> Option<String> {
    REQUEST_ID_HEADERS.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    })
}
