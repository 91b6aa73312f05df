//! Anthropic (Claude) adapter for the Messages API.
//!
//! # Wire format notes
//!
//! - System text is the top-level `system` field, never a `system` role message.
//! - `max_tokens` is mandatory; 1024 is sent when nothing positive was resolved.
//! - The reply is a list of content blocks; only `text` blocks are kept.
//! - HTTP 529 is Anthropic's "overloaded" status and is retryable.
//!
//! Model listing pages through `/v1/models` with `after_id`/`has_more`.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::error::{extract_request_id, ErrorKind, LlmError, RawFailure};
use crate::providers::{
    dispatch, mentions_any, secret_header, LIST_MODELS_TIMEOUT, MAX_LISTED_MODELS, MAX_LIST_PAGES, REQUEST_TIMEOUT,
};
use crate::registry::{ModelItem, ProviderId};
use crate::traits::{AdapterError, ProviderAdapter, SendArgs, SendResult, Usage};

/// Anthropic API base URL
const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";

/// Anthropic API version (required header)
const ANTHROPIC_API_VERSION: &str = "2023-06-01";

/// `max_tokens` used when the router resolved none.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

const MODELS_PAGE_LIMIT: u32 = 100;

// ============================================================================
// Anthropic API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<AnthropicMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicErrorResponse {
    #[serde(default)]
    error: Option<AnthropicErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicErrorBody {
    #[serde(default, rename = "type")]
    error_type: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsPage {
    #[serde(default)]
    data: Vec<ModelEntry>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    last_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    #[serde(default)]
    id: Option<String>,
}

// ============================================================================
// Adapter
// ============================================================================

/// Anthropic Messages API adapter.
#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    client: Client,
    base_url: String,
    api_version: String,
}

impl Default for AnthropicAdapter {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

impl AnthropicAdapter {
    /// Create an adapter sharing `client`.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url: ANTHROPIC_API_BASE.to_string(),
            api_version: ANTHROPIC_API_VERSION.to_string(),
        }
    }

    /// Point the adapter at a different host (proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    fn models_endpoint(&self) -> String {
        format!("{}/v1/models", self.base_url)
    }

    fn authed(&self, request: reqwest::RequestBuilder, api_key: &str) -> Result<reqwest::RequestBuilder, AdapterError> {
        Ok(request
            .header("x-api-key", secret_header(ProviderId::Anthropic, api_key)?)
            .header("anthropic-version", self.api_version.as_str()))
    }
}

fn extract_text(response: &MessagesResponse) -> String {
    response
        .content
        .iter()
        .filter(|b| b.content_type == "text")
        .filter_map(|b| b.text.as_deref())
        .collect()
}

/// Whether a listed model id is a Claude chat model.
pub fn is_chat_model(id: &str) -> bool {
    id.starts_with("claude-")
}

/// Map an Anthropic failure into the shared taxonomy.
pub fn classify(raw: &RawFailure) -> LlmError {
    let (status, headers, body) = match raw {
        RawFailure::NoResponse { .. } => {
            return LlmError::network(ProviderId::Anthropic, "Network error while contacting Anthropic.");
        }
        RawFailure::Status { status, headers, body } => (*status, headers, body),
    };

    let error = serde_json::from_str::<AnthropicErrorResponse>(body)
        .ok()
        .and_then(|r| r.error)
        .unwrap_or_default();
    let message = error.message.unwrap_or_default();

    let (kind, retryable) = match status {
        401 | 403 => (ErrorKind::Auth, false),
        404 => (ErrorKind::NotFoundModel, false),
        429 => (ErrorKind::RateLimit, true),
        400 if mentions_any(&message, &["too long", "too many tokens", "context"]) => (ErrorKind::ContextTooLarge, false),
        400 => (ErrorKind::InvalidRequest, false),
        529 | 500 | 503 => (ErrorKind::Unknown, true),
        _ => (ErrorKind::Unknown, false),
    };

    LlmError::new(kind, ProviderId::Anthropic, "Anthropic request failed.")
        .with_response_meta(status, headers)
        .with_provider_code(error.error_type)
        .retryable(retryable)
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    #[instrument(skip(self, args), fields(model = %args.model))]
    async fn send(&self, args: SendArgs) -> Result<SendResult, AdapterError> {
        let body = MessagesRequest {
            model: &args.model,
            system: args.system_text(),
            messages: args
                .messages
                .iter()
                .map(|m| AnthropicMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            max_tokens: args.max_output_tokens.filter(|n| *n > 0).unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: args.temperature,
            top_p: args.top_p,
        };

        debug!("Sending request to Anthropic API: model={}", body.model);

        let request = self
            .authed(self.client.post(self.endpoint()), &args.api_key)?
            .header(CONTENT_TYPE, "application/json")
            .timeout(REQUEST_TIMEOUT)
            .json(&body);

        let reply = dispatch(request, &args.cancel)
            .await
            .map_err(|e| e.normalize_with(classify))?;

        debug!("Anthropic response received: {} bytes", reply.body.len());

        let parsed: MessagesResponse = reply.json(ProviderId::Anthropic)?;
        Ok(SendResult {
            text: extract_text(&parsed),
            usage: parsed
                .usage
                .map(|u| Usage::from_fields(u, "input_tokens", "output_tokens", None)),
            request_id: extract_request_id(&reply.headers),
            status: Some(reply.status),
        })
    }

    fn normalize_error(&self, raw: &RawFailure) -> LlmError {
        classify(raw)
    }

    #[instrument(skip(self, api_key, cancel))]
    async fn list_models(&self, api_key: &str, cancel: &CancellationToken) -> Result<Vec<ModelItem>, AdapterError> {
        let mut out: Vec<ModelItem> = Vec::new();
        let mut after_id: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            if out.len() >= MAX_LISTED_MODELS {
                break;
            }

            let mut request = self
                .authed(self.client.get(self.models_endpoint()), api_key)?
                .query(&[("limit", MODELS_PAGE_LIMIT.to_string())])
                .timeout(LIST_MODELS_TIMEOUT);
            if let Some(after) = &after_id {
                request = request.query(&[("after_id", after.as_str())]);
            }

            let reply = dispatch(request, cancel).await.map_err(|e| e.normalize_with(classify))?;
            let page: ModelsPage = reply.json(ProviderId::Anthropic)?;
            if page.data.is_empty() {
                break;
            }

            let remaining = MAX_LISTED_MODELS - out.len();
            out.extend(
                page.data
                    .into_iter()
                    .filter_map(|m| m.id)
                    .filter(|id| is_chat_model(id))
                    .take(remaining)
                    .map(|id| ModelItem::new(id.clone(), id)),
            );

            match (page.has_more, page.last_id) {
                (true, Some(last)) if !last.is_empty() => after_id = Some(last),
                _ => break,
            }
        }

        debug!("Anthropic listed {} models", out.len());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ChatMessage;
    use reqwest::header::HeaderMap;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn status_failure(status: u16, body: serde_json::Value) -> RawFailure {
        RawFailure::Status {
            status,
            headers: HeaderMap::new(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_extract_text_only_text_blocks() {
        let parsed: MessagesResponse = serde_json::from_value(json!({
            "content": [
                {"type": "thinking", "thinking": "..."},
                {"type": "text", "text": "Hello "},
                {"type": "text", "text": "world"}
            ]
        }))
        .unwrap();
        assert_eq!(extract_text(&parsed), "Hello world");
    }

    #[test]
    fn test_classify_network() {
        let err = classify(&RawFailure::NoResponse {
            message: "timeout".into(),
            timed_out: true,
        });
        assert_eq!(err.kind, ErrorKind::Network);
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_classify_auth() {
        assert_eq!(classify(&status_failure(401, json!({}))).kind, ErrorKind::Auth);
        assert_eq!(classify(&status_failure(403, json!({}))).kind, ErrorKind::Auth);
    }

    #[test]
    fn test_classify_404_is_model_with_code() {
        let err = classify(&status_failure(
            404,
            json!({"type": "error", "error": {"type": "not_found_error", "message": "model: claude-x"}}),
        ));
        assert_eq!(err.kind, ErrorKind::NotFoundModel);
        assert_eq!(err.provider_code.as_deref(), Some("not_found_error"));
    }

    #[test]
    fn test_classify_400_context_vs_invalid() {
        let ctx = classify(&status_failure(
            400,
            json!({"error": {"type": "invalid_request_error", "message": "prompt is too long: 250000 tokens > 200000 maximum"}}),
        ));
        assert_eq!(ctx.kind, ErrorKind::ContextTooLarge);

        let invalid = classify(&status_failure(
            400,
            json!({"error": {"type": "invalid_request_error", "message": "temperature: out of range"}}),
        ));
        assert_eq!(invalid.kind, ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_classify_overload_retryable() {
        let err = classify(&status_failure(529, json!({"error": {"type": "overloaded_error", "message": "Overloaded"}})));
        assert_eq!(err.kind, ErrorKind::Unknown);
        assert!(err.is_recoverable());
        assert!(err.is_overload());
    }

    #[test]
    fn test_classify_rate_limit() {
        let err = classify(&status_failure(429, json!({"error": {"type": "rate_limit_error"}})));
        assert_eq!(err.kind, ErrorKind::RateLimit);
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_send_builds_messages_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "ak-test"))
            .and(header("anthropic-version", "2023-06-01"))
            .and(body_json(json!({
                "model": "claude-sonnet-4-5-20250929",
                "system": "Be terse.",
                "messages": [
                    {"role": "user", "content": "hi"},
                    {"role": "assistant", "content": "hello"},
                    {"role": "user", "content": "again"}
                ],
                "max_tokens": 1024,
                "top_p": 0.5
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("request-id", "req_ant")
                    .set_body_json(json!({
                        "content": [{"type": "text", "text": "ok"}],
                        "usage": {"input_tokens": 10, "output_tokens": 2}
                    })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let adapter = AnthropicAdapter::default().with_base_url(server.uri());
        let args = SendArgs::new(
            "ak-test",
            "claude-sonnet-4-5-20250929",
            vec![ChatMessage::user("hi"), ChatMessage::assistant("hello"), ChatMessage::user("again")],
        )
        .with_system("Be terse.")
        .with_sampling(None, Some(0.5));

        let result = adapter.send(args).await.unwrap();
        assert_eq!(result.text, "ok");
        assert_eq!(result.request_id.as_deref(), Some("req_ant"));
        assert_eq!(result.usage.unwrap().total_tokens, Some(12));
    }

    #[tokio::test]
    async fn test_send_overload_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(529)
                    .insert_header("retry-after", "3")
                    .set_body_json(json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}})),
            )
            .mount(&server)
            .await;

        let adapter = AnthropicAdapter::default().with_base_url(server.uri());
        let err = adapter
            .send(SendArgs::new("k", "claude-opus-4-20250514", vec![ChatMessage::user("q")]))
            .await
            .unwrap_err();
        match err {
            AdapterError::Normalized(e) => {
                assert_eq!(e.status, Some(529));
                assert_eq!(e.retry_after_sec, Some(3));
                assert_eq!(e.provider_code.as_deref(), Some("overloaded_error"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_models_paginates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .and(query_param("after_id", "claude-b"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "claude-c"}],
                "has_more": false
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .and(query_param("limit", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "claude-a"}, {"id": "not-claude"}, {"id": "claude-b"}],
                "has_more": true,
                "last_id": "claude-b"
            })))
            .mount(&server)
            .await;

        let adapter = AnthropicAdapter::default().with_base_url(server.uri());
        let models = adapter.list_models("k", &CancellationToken::new()).await.unwrap();
        let ids: Vec<_> = models.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["claude-a", "claude-b", "claude-c"]);
    }
}
