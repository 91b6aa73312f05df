//! Gemini adapter for the `generateContent` API.
//!
//! # Wire format notes
//!
//! ```text
//! ChatMessage{role: assistant} ──▶ {"role": "model", "parts": [{"text": ..}]}
//! ChatMessage{role: user}      ──▶ {"role": "user",  "parts": [{"text": ..}]}
//! system text                  ──▶ "systemInstruction": {"parts": [{"text": ..}]}
//! ```
//!
//! `generationConfig` carries only the fields that were set and is omitted
//! entirely when empty, since the API rejects null members.
//!
//! Google's own status string (`NOT_FOUND`, `RESOURCE_EXHAUSTED`,
//! `INVALID_ARGUMENT`) is used as the provider code and participates in
//! classification alongside the HTTP status.

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
use crate::traits::{AdapterError, ChatMessage, ChatRole, ProviderAdapter, SendArgs, SendResult, Usage};

/// Gemini API host
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";

const MODELS_PAGE_SIZE: u32 = 100;

// ============================================================================
// Gemini API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

impl GenerationConfig {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Option<Vec<Candidate>>,
    #[serde(default)]
    usage_metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Default, Deserialize)]
struct GeminiErrorResponse {
    #[serde(default)]
    error: Option<GeminiErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
struct GeminiErrorBody {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelsPage {
    #[serde(default)]
    models: Vec<ModelEntry>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "supported_actions", alias = "supportedActions")]
    supported_generation_methods: Option<Vec<String>>,
}

// ============================================================================
// Adapter
// ============================================================================

/// Gemini generateContent adapter.
#[derive(Debug, Clone)]
pub struct GeminiAdapter {
    client: Client,
    base_url: String,
}

impl Default for GeminiAdapter {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

impl GeminiAdapter {
    /// Create an adapter sharing `client`.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url: GEMINI_API_BASE.to_string(),
        }
    }

    /// Point the adapter at a different host (proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// `generateContent` URL; `model` may carry a `models/` prefix.
    pub fn generate_url(&self, model: &str) -> String {
        let name = model.strip_prefix("models/").unwrap_or(model);
        format!("{}/v1beta/models/{}:generateContent", self.base_url, name)
    }

    fn models_url(&self) -> String {
        format!("{}/v1beta/models", self.base_url)
    }
}

fn convert_messages(messages: &[ChatMessage]) -> Vec<Content> {
    messages
        .iter()
        .map(|m| Content {
            role: Some(
                match m.role {
                    ChatRole::User => "user",
                    ChatRole::Assistant => "model",
                }
                .to_string(),
            ),
            parts: vec![Part {
                text: Some(m.content.clone()),
            }],
        })
        .collect()
}

fn extract_text(response: &GenerateContentResponse) -> String {
    response
        .candidates
        .as_ref()
        .and_then(|c| c.first())
        .and_then(|c| c.content.as_ref())
        .map(|content| content.parts.iter().filter_map(|p| p.text.as_deref()).collect())
        .unwrap_or_default()
}

/// Whether a listed model can serve `generateContent`.
///
/// Uses the advertised methods when present, else a name heuristic.
pub fn is_chat_model(id: &str, methods: Option<&[String]>) -> bool {
    if id.is_empty() {
        return false;
    }
    if let Some(methods) = methods {
        return methods.iter().any(|m| m == "generateContent");
    }
    let id = id.to_lowercase();
    !["embed", "tts", "transcribe", "audio", "image"]
        .iter()
        .any(|f| id.contains(f))
}

/// Map a Gemini failure into the shared taxonomy.
pub fn classify(raw: &RawFailure) -> LlmError {
    let (status, headers, body) = match raw {
        RawFailure::NoResponse { .. } => {
            return LlmError::network(ProviderId::Gemini, "Network error while contacting Gemini.");
        }
        RawFailure::Status { status, headers, body } => (*status, headers, body),
    };

    let error = serde_json::from_str::<GeminiErrorResponse>(body)
        .ok()
        .and_then(|r| r.error)
        .unwrap_or_default();
    let google_status = error.status.as_deref().unwrap_or_default();
    let message = error.message.as_deref().unwrap_or_default().to_lowercase();

    let (kind, retryable) = match (status, google_status) {
        (401 | 403, _) => (ErrorKind::Auth, false),
        (404, _) | (_, "NOT_FOUND") => (ErrorKind::NotFoundModel, false),
        (429, _) | (_, "RESOURCE_EXHAUSTED") => (ErrorKind::RateLimit, true),
        (400, _) | (_, "INVALID_ARGUMENT") => {
            let too_large = mentions_any(&message, &["too large", "too long"])
                || (message.contains("maximum") && message.contains("tokens"));
            if too_large {
                (ErrorKind::ContextTooLarge, false)
            } else {
                (ErrorKind::InvalidRequest, false)
            }
        }
        (500 | 503, _) => (ErrorKind::Unknown, true),
        _ => (ErrorKind::Unknown, false),
    };

    LlmError::new(kind, ProviderId::Gemini, "Gemini request failed.")
        .with_response_meta(status, headers)
        .with_provider_code(error.status)
        .retryable(retryable)
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    #[instrument(skip(self, args), fields(model = %args.model))]
    async fn send(&self, args: SendArgs) -> Result<SendResult, AdapterError> {
        let generation_config = GenerationConfig {
            max_output_tokens: args.max_output_tokens.filter(|n| *n > 0),
            temperature: args.temperature,
            top_p: args.top_p,
        };

        let body = GenerateContentRequest {
            contents: convert_messages(&args.messages),
            generation_config: Some(generation_config).filter(|c| !c.is_empty()),
            system_instruction: args.system_text().map(|s| Content {
                role: None,
                parts: vec![Part {
                    text: Some(s.to_string()),
                }],
            }),
        };

        let request = self
            .client
            .post(self.generate_url(&args.model))
            .header("x-goog-api-key", secret_header(ProviderId::Gemini, &args.api_key)?)
            .header(CONTENT_TYPE, "application/json")
            .timeout(REQUEST_TIMEOUT)
            .json(&body);

        let reply = dispatch(request, &args.cancel)
            .await
            .map_err(|e| e.normalize_with(classify))?;

        debug!("Gemini response received: {} bytes", reply.body.len());

        let parsed: GenerateContentResponse = reply.json(ProviderId::Gemini)?;
        Ok(SendResult {
            text: extract_text(&parsed),
            usage: parsed.usage_metadata.map(|u| {
                Usage::from_fields(u, "promptTokenCount", "candidatesTokenCount", Some("totalTokenCount"))
            }),
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
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            if out.len() >= MAX_LISTED_MODELS {
                break;
            }

            let mut request = self
                .client
                .get(self.models_url())
                .header("x-goog-api-key", secret_header(ProviderId::Gemini, api_key)?)
                .query(&[("pageSize", MODELS_PAGE_SIZE.to_string())])
                .timeout(LIST_MODELS_TIMEOUT);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let reply = dispatch(request, cancel).await.map_err(|e| e.normalize_with(classify))?;
            let page: ModelsPage = reply.json(ProviderId::Gemini)?;

            let remaining = MAX_LISTED_MODELS - out.len();
            out.extend(
                page.models
                    .into_iter()
                    .filter_map(|m| {
                        let id = m.name?.trim_start_matches("models/").to_string();
                        is_chat_model(&id, m.supported_generation_methods.as_deref()).then_some(id)
                    })
                    .take(remaining)
                    .map(|id| ModelItem::new(id.clone(), id)),
            );

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!("Gemini listed {} models", out.len());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn test_generate_url_accepts_models_prefix() {
        let adapter = GeminiAdapter::default().with_base_url("http://h");
        assert_eq!(
            adapter.generate_url("gemini-2.5-flash"),
            "http://h/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert_eq!(
            adapter.generate_url("models/gemini-2.5-pro"),
            "http://h/v1beta/models/gemini-2.5-pro:generateContent"
        );
    }

    #[test]
    fn test_convert_messages_roles() {
        let contents = convert_messages(&[ChatMessage::user("q"), ChatMessage::assistant("a")]);
        assert_eq!(contents[0].role.as_deref(), Some("user"));
        assert_eq!(contents[1].role.as_deref(), Some("model"));
    }

    #[test]
    fn test_generation_config_omitted_when_empty() {
        let body = GenerateContentRequest {
            contents: vec![],
            generation_config: Some(GenerationConfig::default()).filter(|c| !c.is_empty()),
            system_instruction: None,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value, json!({"contents": []}));
    }

    #[test]
    fn test_extract_text_first_candidate() {
        let parsed: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [
                {"content": {"parts": [{"text": "a"}, {"text": "b"}]}},
                {"content": {"parts": [{"text": "ignored"}]}}
            ]
        }))
        .unwrap();
        assert_eq!(extract_text(&parsed), "ab");

        let empty: GenerateContentResponse = serde_json::from_value(json!({})).unwrap();
        assert_eq!(extract_text(&empty), "");
    }

    #[test]
    fn test_model_filter() {
        let generate = vec!["generateContent".to_string()];
        let embed = vec!["embedContent".to_string()];
        assert!(is_chat_model("gemini-2.5-flash", Some(generate.as_slice())));
        assert!(!is_chat_model("text-embedding-004", Some(embed.as_slice())));
        assert!(is_chat_model("gemini-2.0-flash", None));
        assert!(!is_chat_model("gemini-2.5-flash-preview-tts", None));
        assert!(!is_chat_model("gemini-2.0-flash-exp-image-generation", None));
    }

    #[test]
    fn test_classify_network_and_auth() {
        let net = classify(&RawFailure::NoResponse {
            message: "dns".into(),
            timed_out: false,
        });
        assert_eq!(net.kind, ErrorKind::Network);
        assert!(net.is_recoverable());
        assert_eq!(classify(&status_failure(403, json!({}))).kind, ErrorKind::Auth);
    }

    #[test]
    fn test_classify_not_found_by_status_or_code() {
        assert_eq!(classify(&status_failure(404, json!({}))).kind, ErrorKind::NotFoundModel);
        let by_code = classify(&status_failure(418, json!({"error": {"status": "NOT_FOUND"}})));
        assert_eq!(by_code.kind, ErrorKind::NotFoundModel);
        assert_eq!(by_code.provider_code.as_deref(), Some("NOT_FOUND"));
    }

    #[test]
    fn test_classify_resource_exhausted() {
        let err = classify(&status_failure(429, json!({"error": {"status": "RESOURCE_EXHAUSTED"}})));
        assert_eq!(err.kind, ErrorKind::RateLimit);
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_classify_invalid_argument() {
        let ctx = classify(&status_failure(
            400,
            json!({"error": {"status": "INVALID_ARGUMENT", "message": "The input token count exceeds the maximum number of tokens allowed"}}),
        ));
        assert_eq!(ctx.kind, ErrorKind::ContextTooLarge);

        let invalid = classify(&status_failure(
            400,
            json!({"error": {"status": "INVALID_ARGUMENT", "message": "Invalid value at 'generation_config.temperature'"}}),
        ));
        assert_eq!(invalid.kind, ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn test_send_builds_generate_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.5-flash:generateContent"))
            .and(header("x-goog-api-key", "g-key"))
            .and(body_json(json!({
                "contents": [
                    {"role": "user", "parts": [{"text": "hi"}]},
                    {"role": "model", "parts": [{"text": "hello"}]},
                    {"role": "user", "parts": [{"text": "more"}]}
                ],
                "generationConfig": {"maxOutputTokens": 64},
                "systemInstruction": {"parts": [{"text": "Be terse."}]}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "fine"}]}}],
                "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 1, "totalTokenCount": 6}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = GeminiAdapter::default().with_base_url(server.uri());
        let args = SendArgs::new(
            "g-key",
            "models/gemini-2.5-flash",
            vec![ChatMessage::user("hi"), ChatMessage::assistant("hello"), ChatMessage::user("more")],
        )
        .with_system("Be terse.")
        .with_max_output_tokens(Some(64));

        let result = adapter.send(args).await.unwrap();
        assert_eq!(result.text, "fine");
        assert_eq!(result.usage.unwrap().input_tokens, Some(5));
    }

    #[tokio::test]
    async fn test_list_models_follows_page_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1beta/models"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [{"name": "models/gemini-2.0-flash", "supportedGenerationMethods": ["generateContent"]}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1beta/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [
                    {"name": "models/gemini-2.5-flash", "supportedGenerationMethods": ["generateContent", "countTokens"]},
                    {"name": "models/text-embedding-004", "supportedGenerationMethods": ["embedContent"]}
                ],
                "nextPageToken": "p2"
            })))
            .mount(&server)
            .await;

        let adapter = GeminiAdapter::default().with_base_url(server.uri());
        let models = adapter.list_models("g", &CancellationToken::new()).await.unwrap();
        let ids: Vec<_> = models.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["gemini-2.5-flash", "gemini-2.0-flash"]);
    }
}
