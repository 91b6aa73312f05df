//! Router end-to-end tests against mocked provider endpoints.
//!
//! Each test points the real HTTP adapters at a `wiremock` server, so the full
//! path is exercised: settings, key lookup, payload build, wire format,
//! error classification and the oversized-context retry.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use gpthelper_llm::{
    AdapterSet, AnthropicAdapter, ChatRole, ContextMode, ErrorKind, GeminiAdapter, HistoryEntry, LlmRouter,
    MemoryConfig, MemorySecretStore, MessageContext, OpenAIAdapter, ProviderId, RouterContext, SendRequest,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

// ============================================================================
// Helper Functions
// ============================================================================

fn router_for(server: &MockServer, provider: ProviderId) -> (LlmRouter, Arc<Mutex<Vec<String>>>) {
    let client = reqwest::Client::new();
    let adapters = AdapterSet::default()
        .with(Arc::new(OpenAIAdapter::new(client.clone()).with_base_url(server.uri())))
        .with(Arc::new(AnthropicAdapter::new(client.clone()).with_base_url(server.uri())))
        .with(Arc::new(GeminiAdapter::new(client).with_base_url(server.uri())));

    let config = MemoryConfig::new().with("provider", provider.as_str());
    let secrets = MemorySecretStore::new().with(provider.secret_key(), "test-key");
    let warnings = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&warnings);

    let ctx = RouterContext::new(Arc::new(config), Arc::new(secrets))
        .with_adapters(adapters)
        .with_warn(move |msg| sink.lock().unwrap().push(msg.to_string()));
    (LlmRouter::new(ctx), warnings)
}

fn last_openai_input(request: &Request) -> String {
    let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    body["input"].as_str().unwrap_or_default().to_string()
}

// ============================================================================
// OpenAI
// ============================================================================

#[tokio::test]
async fn test_openai_round_trip_with_history() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "gpt-5.2",
            "instructions": "Answer in French.",
            "input": "User: earlier\n\nAssistant: noted\n\nUser: now"
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-request-id", "req_123")
                .set_body_json(json!({
                    "output_text": "d'accord",
                    "usage": {"input_tokens": 12, "output_tokens": 3, "total_tokens": 15}
                })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (router, _) = router_for(&server, ProviderId::OpenAI);
    let history = vec![
        HistoryEntry::new(ChatRole::User, "earlier", ProviderId::OpenAI, "gpt-5.2"),
        HistoryEntry::new(ChatRole::Assistant, "noted", ProviderId::OpenAI, "gpt-5.2"),
        HistoryEntry::new(ChatRole::User, "claude only", ProviderId::Anthropic, "claude"),
    ];

    let outcome = router
        .send(
            SendRequest::new("now")
                .with_system("Answer in French.")
                .with_history(history)
                .with_context(ContextMode::LastN, 5),
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.text, "d'accord");
    assert_eq!(outcome.provider, ProviderId::OpenAI);
    assert_eq!(outcome.request_id.as_deref(), Some("req_123"));
    assert_eq!(outcome.usage.unwrap().total_tokens, Some(15));
}

#[tokio::test]
async fn test_openai_context_too_large_retries_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "message": "This model's maximum context length is 128000 tokens.",
                "type": "invalid_request_error",
                "code": "context_length_exceeded"
            }
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"output_text": "fits now"})))
        .expect(1)
        .mount(&server)
        .await;

    let (router, _) = router_for(&server, ProviderId::OpenAI);
    let prompt = "z".repeat(300_000);
    let outcome = router.send(SendRequest::new(prompt)).await.unwrap().unwrap();
    assert_eq!(outcome.text, "fits now");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let first = last_openai_input(&requests[0]);
    let second = last_openai_input(&requests[1]);
    assert!(first.chars().count() > 300_000);
    // "User: " prefix plus the truncated prompt
    assert!(second.chars().count() <= 200_000 + "User: ".len());
}

#[tokio::test]
async fn test_openai_quota_exhaustion_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "20")
                .set_body_json(json!({
                    "error": {"message": "You exceeded your current quota", "code": "insufficient_quota"}
                })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (router, _) = router_for(&server, ProviderId::OpenAI);
    let err = router.send(SendRequest::new("hi")).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::RateLimit);
    assert!(!err.is_recoverable());
    assert_eq!(err.retry_after_sec, Some(20));
    assert_eq!(err.provider_code.as_deref(), Some("insufficient_quota"));
}

// ============================================================================
// Anthropic
// ============================================================================

#[tokio::test]
async fn test_anthropic_overload_is_retryable_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(
            ResponseTemplate::new(529)
                .insert_header("retry-after", "7")
                .insert_header("request-id", "req_busy")
                .set_body_json(json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (router, _) = router_for(&server, ProviderId::Anthropic);
    let err = router.send(SendRequest::new("hi")).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Unknown);
    assert!(err.is_recoverable());
    assert!(err.is_overload());
    assert_eq!(err.request_id.as_deref(), Some("req_busy"));

    let text = err.user_message(&MessageContext::new("Anthropic"));
    assert!(text.contains("req_busy"));
}

#[tokio::test]
async fn test_anthropic_sampling_conflict_drops_top_p() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_partial_json(json!({"temperature": 0.25, "max_tokens": 1024})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "text", "text": "a"}, {"type": "tool_use", "id": "x"}, {"type": "text", "text": "b"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (router, warnings) = router_for(&server, ProviderId::Anthropic);
    let outcome = router
        .send(SendRequest::new("hi").with_sampling(Some(0.25), Some(0.9)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.text, "ab");

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert!(body.get("top_p").is_none());
    assert_eq!(warnings.lock().unwrap().len(), 1);
}

// ============================================================================
// Gemini
// ============================================================================

#[tokio::test]
async fn test_gemini_unknown_model_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"code": 404, "message": "models/nope is not found", "status": "NOT_FOUND"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (router, _) = router_for(&server, ProviderId::Gemini);
    router.set_model(ProviderId::Gemini, "nope").await.unwrap();
    let err = router.send(SendRequest::new("hi")).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFoundModel);
    assert_eq!(err.provider, ProviderId::Gemini);
}

#[tokio::test]
async fn test_gemini_role_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.5-flash:generateContent"))
        .and(header("x-goog-api-key", "test-key"))
        .and(body_partial_json(json!({
            "contents": [
                {"role": "user", "parts": [{"text": "q1"}]},
                {"role": "model", "parts": [{"text": "a1"}]},
                {"role": "user", "parts": [{"text": "q2"}]}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"text": "a2"}]}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (router, _) = router_for(&server, ProviderId::Gemini);
    let history = vec![
        HistoryEntry::new(ChatRole::User, "q1", ProviderId::Gemini, "gemini-2.5-flash"),
        HistoryEntry::new(ChatRole::Assistant, "a1", ProviderId::Gemini, "gemini-2.5-flash"),
    ];
    let outcome = router
        .send(SendRequest::new("q2").with_history(history).with_context(ContextMode::Full, 0))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.text, "a2");
}

// ============================================================================
// Cross-cutting
// ============================================================================

#[tokio::test]
async fn test_missing_key_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (router, _) = router_for(&server, ProviderId::Gemini);
    router.remove_api_key(ProviderId::Gemini).await;
    let err = router.send(SendRequest::new("hi")).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Auth);
    assert_eq!(err.message, "Missing API key.");
}

#[tokio::test]
async fn test_cancel_in_flight_returns_none() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(10))
                .set_body_json(json!({"output_text": "late"})),
        )
        .mount(&server)
        .await;

    let (router, _) = router_for(&server, ProviderId::OpenAI);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let outcome = router.send(SendRequest::new("hi").with_cancel(cancel)).await.unwrap();
    assert!(outcome.is_none());
}
