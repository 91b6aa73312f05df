//! OpenAI adapter (Responses API).
//!
//! The Responses endpoint takes a single `input` string plus optional
//! top-level `instructions`, so the conversation is flattened into
//! role-prefixed paragraphs:
//!
//! ```text
//! User: first question
//!
//! Assistant: first answer
//!
//! User: follow-up
//! ```
//!
//! # Error classification
//!
//! | Status | Condition | Kind |
//! |--------|-----------|------|
//! | 401, 403 | | `Auth` |
//! | 404 | code `model_not_found` or message names a missing model | `NotFoundModel` |
//! | 404 | otherwise | `NotFoundEndpoint` |
//! | 400 | code `model_not_found` | `NotFoundModel` |
//! | 400 | context/length phrasing | `ContextTooLarge` |
//! | 400 | otherwise | `InvalidRequest` |
//! | 429 | quota exhausted (not retryable) or rate limited | `RateLimit` |
//! | 500, 503 | | `Unknown`, retryable |
//!
//! Telling a missing model from a missing endpoint relies on OpenAI's
//! wording and is best-effort.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::error::{ErrorKind, LlmError, RawFailure};
use crate::providers::{
    dispatch, mentions_any, secret_header, LIST_MODELS_TIMEOUT, MAX_LISTED_MODELS, REQUEST_TIMEOUT,
};
use crate::registry::{ModelItem, ProviderId};
use crate::traits::{AdapterError, ChatMessage, ChatRole, ProviderAdapter, SendArgs, SendResult, Usage};

/// OpenAI API base URL
const OPENAI_API_BASE: &str = "https://api.openai.com";

/// Model id fragments that never serve text completions.
const DENIED_MODEL_FRAGMENTS: &[&str] = &[
    "text-embedding-",
    "embedding-",
    "omni-moderation",
    "moderation",
    "text-moderation",
    "dall-e",
    "gpt-image",
    "chatgpt-image",
    "image-",
    "whisper",
    "transcribe",
    "tts",
    "audio",
    "realtime",
    "davinci",
    "curie",
    "babbage",
    "ada",
];

/// Model families known to serve text completions.
const ALLOWED_MODEL_PREFIXES: &[&str] = &["gpt-", "o1", "o3", "o4"];

// ============================================================================
// OpenAI API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<&'a str>,
    input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    output: Option<Vec<OutputItem>>,
    #[serde(default)]
    usage: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Option<Vec<OutputContent>>,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAIErrorResponse {
    #[serde(default)]
    error: Option<OpenAIErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAIErrorBody {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default, rename = "type")]
    error_type: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsPage {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    #[serde(default)]
    id: Option<String>,
}

// ============================================================================
// Adapter
// ============================================================================

/// OpenAI Responses API adapter.
#[derive(Debug, Clone)]
pub struct OpenAIAdapter {
    client: Client,
    base_url: String,
}

impl Default for OpenAIAdapter {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

impl OpenAIAdapter {
    /// Create an adapter sharing `client`.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url: OPENAI_API_BASE.to_string(),
        }
    }

    /// Point the adapter at a different host (proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn responses_url(&self) -> String {
        format!("{}/v1/responses", self.base_url)
    }

    fn models_url(&self) -> String {
        format!("{}/v1/models", self.base_url)
    }
}

/// Flatten messages into `"User: ..\n\nAssistant: .."`, skipping empty turns.
pub fn build_input_text(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .filter(|m| !m.content.is_empty())
        .map(|m| {
            let role = match m.role {
                ChatRole::User => "User",
                ChatRole::Assistant => "Assistant",
            };
            format!("{}: {}", role, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn extract_output_text(response: &ResponsesResponse) -> String {
    if let Some(text) = &response.output_text {
        return text.clone();
    }
    response
        .output
        .iter()
        .flatten()
        .filter_map(|item| item.content.as_ref())
        .flatten()
        .filter_map(|block| block.text.as_deref())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Whether a listed model id is a text-completion model.
pub fn is_chat_model(id: &str) -> bool {
    let id = id.trim().to_lowercase();
    if id.is_empty() || DENIED_MODEL_FRAGMENTS.iter().any(|f| id.contains(f)) {
        return false;
    }
    ALLOWED_MODEL_PREFIXES.iter().any(|p| id.starts_with(p))
}

/// Map an OpenAI failure into the shared taxonomy.
pub fn classify(raw: &RawFailure) -> LlmError {
    let (status, headers, body) = match raw {
        RawFailure::NoResponse { .. } => {
            return LlmError::network(ProviderId::OpenAI, "Network error while contacting OpenAI.");
        }
        RawFailure::Status { status, headers, body } => (*status, headers, body),
    };

    let error = serde_json::from_str::<OpenAIErrorResponse>(body)
        .ok()
        .and_then(|r| r.error)
        .unwrap_or_default();
    let provider_code = error
        .code
        .as_ref()
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .or(error.error_type);
    let message = error.message.unwrap_or_default();
    let model_missing = provider_code.as_deref() == Some("model_not_found");

    let (kind, retryable) = match status {
        401 | 403 => (ErrorKind::Auth, false),
        404 => {
            let lower = message.to_lowercase();
            if model_missing || (lower.contains("model") && lower.contains("not found")) {
                (ErrorKind::NotFoundModel, false)
            } else {
                (ErrorKind::NotFoundEndpoint, false)
            }
        }
        429 => {
            let quota = provider_code.as_deref() == Some("insufficient_quota")
                || mentions_any(&message, &["check your plan and billing details"]);
            (ErrorKind::RateLimit, !quota)
        }
        400 if model_missing => (ErrorKind::NotFoundModel, false),
        400 => {
            let lower = message.to_lowercase();
            let too_large = (lower.contains("context") && lower.contains("length"))
                || mentions_any(&lower, &["too many tokens", "maximum context"]);
            if too_large {
                (ErrorKind::ContextTooLarge, false)
            } else {
                (ErrorKind::InvalidRequest, false)
            }
        }
        500 | 503 => (ErrorKind::Unknown, true),
        _ => (ErrorKind::Unknown, false),
    };

    LlmError::new(kind, ProviderId::OpenAI, "OpenAI request failed.")
        .with_response_meta(status, headers)
        .with_provider_code(provider_code)
        .retryable(retryable)
}

#[async_trait]
impl ProviderAdapter for OpenAIAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::OpenAI
    }

    #[instrument(skip(self, args), fields(model = %args.model))]
    async fn send(&self, args: SendArgs) -> Result<SendResult, AdapterError> {
        let auth = secret_header(ProviderId::OpenAI, &format!("Bearer {}", args.api_key))?;

        let body = ResponsesRequest {
            model: &args.model,
            instructions: args.system_text(),
            input: build_input_text(&args.messages),
            max_output_tokens: args.max_output_tokens.filter(|n| *n > 0),
            temperature: args.temperature,
            top_p: args.top_p,
        };

        let request = self
            .client
            .post(self.responses_url())
            .header(AUTHORIZATION, auth)
            .header(CONTENT_TYPE, "application/json")
            .timeout(REQUEST_TIMEOUT)
            .json(&body);

        let reply = dispatch(request, &args.cancel)
            .await
            .map_err(|e| e.normalize_with(classify))?;

        debug!("OpenAI response received: {} bytes", reply.body.len());

        let parsed: ResponsesResponse = reply.json(ProviderId::OpenAI)?;
        Ok(SendResult {
            text: extract_output_text(&parsed),
            usage: parsed
                .usage
                .map(|u| Usage::from_fields(u, "input_tokens", "output_tokens", Some("total_tokens"))),
            request_id: crate::error::extract_request_id(&reply.headers),
            status: Some(reply.status),
        })
    }

    fn normalize_error(&self, raw: &RawFailure) -> LlmError {
        classify(raw)
    }

    #[instrument(skip(self, api_key, cancel))]
    async fn list_models(&self, api_key: &str, cancel: &CancellationToken) -> Result<Vec<ModelItem>, AdapterError> {
        let auth = secret_header(ProviderId::OpenAI, &format!("Bearer {api_key}"))?;
        let request = self
            .client
            .get(self.models_url())
            .header(AUTHORIZATION, auth)
            .timeout(LIST_MODELS_TIMEOUT);

        let reply = dispatch(request, cancel).await.map_err(|e| e.normalize_with(classify))?;
        let page: ModelsPage = reply.json(ProviderId::OpenAI)?;

        Ok(page
            .data
            .into_iter()
            .filter_map(|m| m.id)
            .filter(|id| is_chat_model(id))
            .take(MAX_LISTED_MODELS)
            .map(|id| ModelItem::new(id.clone(), id))
            .collect())
    }
}
