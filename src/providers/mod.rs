//! Provider adapter implementations.
//!
//! Each adapter owns one wire format. The helpers in this module are the
//! parts they share: per-call timeouts, cancellation-aware dispatch, header
//! construction and case-insensitive message matching used by classifiers.

pub mod anthropic;
pub mod gemini;
pub mod mock;
pub mod openai;

pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use mock::{MockAdapter, MockOutcome};
pub use openai::OpenAIAdapter;

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorKind, LlmError, RawFailure};
use crate::registry::ProviderId;
use crate::traits::AdapterError;

/// Transport timeout for a completion request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Transport timeout for one model-listing page.
pub const LIST_MODELS_TIMEOUT: Duration = Duration::from_secs(30);

/// Most listing pages fetched per refresh.
pub const MAX_LIST_PAGES: usize = 10;

/// Most models kept per refresh.
pub const MAX_LISTED_MODELS: usize = 500;

/// A successful HTTP exchange.
#[derive(Debug)]
pub(crate) struct HttpReply {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl HttpReply {
    pub(crate) fn json<T: DeserializeOwned>(&self, provider: ProviderId) -> Result<T, LlmError> {
        serde_json::from_str(&self.body).map_err(|e| {
            LlmError::new(
                ErrorKind::Unknown,
                provider,
                format!("Failed to parse {} response: {}", provider.label(), e),
            )
            .with_response_meta(self.status, &self.headers)
        })
    }
}

/// Send `request`, racing it against `cancel`.
///
/// Non-2xx answers come back as [`AdapterError::Raw`] with status, headers
/// and body so the adapter can classify them.
pub(crate) async fn dispatch(request: RequestBuilder, cancel: &CancellationToken) -> Result<HttpReply, AdapterError> {
    if cancel.is_cancelled() {
        return Err(AdapterError::Cancelled);
    }

    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(AdapterError::Cancelled),
        res = request.send() => res.map_err(|e| AdapterError::Raw(RawFailure::from_reqwest(&e)))?,
    };

    let status = response.status().as_u16();
    let headers = response.headers().clone();

    let body = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(AdapterError::Cancelled),
        body = response.text() => body.map_err(|e| AdapterError::Raw(RawFailure::from_reqwest(&e)))?,
    };

    if !(200..300).contains(&status) {
        return Err(AdapterError::Raw(RawFailure::Status { status, headers, body }));
    }

    Ok(HttpReply { status, headers, body })
}

/// Header value for a credential, marked sensitive.
pub(crate) fn secret_header(provider: ProviderId, value: &str) -> Result<HeaderValue, AdapterError> {
    let mut header = HeaderValue::from_str(value).map_err(|_| {
        LlmError::new(
            ErrorKind::Auth,
            provider,
            "API key contains characters that cannot be sent in a header.",
        )
    })?;
    header.set_sensitive(true);
    Ok(header)
}

/// Whether `text` contains any of `needles`, ignoring case.
pub(crate) fn mentions_any(text: &str, needles: &[&str]) -> bool {
    let lower = text.to_lowercase();
    needles.iter().any(|n| lower.contains(n))
}
