//! Scripted adapter for testing.
//!
//! `MockAdapter` answers `send` from a queue of scripted outcomes and records
//! every [`SendArgs`] it receives, so tests can assert on what the router
//! actually dispatched without any network traffic.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ MockAdapter (id = anthropic, say)             │
//! │  queue:  [Err(ContextTooLarge), Ok("done")]   │
//! │  calls:  [SendArgs#1, SendArgs#2]             │
//! │  empty queue ─▶ Ok("mock response")           │
//! └──────────────────────────────────────────────┘
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorKind, LlmError, RawFailure};
use crate::registry::{ModelItem, ProviderId};
use crate::traits::{AdapterError, ProviderAdapter, SendArgs, SendResult};

/// Text returned once the script runs out.
pub const DEFAULT_MOCK_TEXT: &str = "mock response";

/// One scripted outcome.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Succeed with this text.
    Text(String),
    /// Fail with an already classified error.
    Fail(LlmError),
    /// Fail with a raw failure; the router asks [`MockAdapter::normalize_error`].
    Raw(RawFailure),
    /// Wait for the caller to cancel, then report cancellation.
    WaitForCancel,
    /// Report cancellation immediately.
    Cancelled,
}

/// Mock adapter with a scripted queue of outcomes.
#[derive(Debug, Clone)]
pub struct MockAdapter {
    id: ProviderId,
    script: Arc<Mutex<VecDeque<MockOutcome>>>,
    calls: Arc<Mutex<Vec<SendArgs>>>,
    call_count: Arc<AtomicUsize>,
    models: Arc<Mutex<Result<Vec<ModelItem>, LlmError>>>,
    list_calls: Arc<AtomicUsize>,
}

impl MockAdapter {
    /// Create a mock impersonating `id`.
    pub fn new(id: ProviderId) -> Self {
        Self {
            id,
            script: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            call_count: Arc::new(AtomicUsize::new(0)),
            models: Arc::new(Mutex::new(Ok(Vec::new()))),
            list_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue an outcome.
    pub fn push(&self, outcome: MockOutcome) -> &Self {
        lock(&self.script).push_back(outcome);
        self
    }

    /// Queue a successful text response.
    pub fn push_text(&self, text: impl Into<String>) -> &Self {
        self.push(MockOutcome::Text(text.into()))
    }

    /// Queue a classified failure of `kind`.
    pub fn push_error(&self, kind: ErrorKind) -> &Self {
        self.push(MockOutcome::Fail(LlmError::new(kind, self.id, "mock failure")))
    }

    /// Set what `list_models` returns.
    pub fn set_models(&self, models: Result<Vec<ModelItem>, LlmError>) {
        *lock(&self.models) = models;
    }

    /// Number of `send` calls so far.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Number of `list_models` calls so far.
    pub fn list_count(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Arguments of every `send` call, in order.
    pub fn calls(&self) -> Vec<SendArgs> {
        lock(&self.calls).clone()
    }

    /// Arguments of the most recent `send` call.
    pub fn last_call(&self) -> Option<SendArgs> {
        lock(&self.calls).last().cloned()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn id(&self) -> ProviderId {
        self.id
    }

    async fn send(&self, args: SendArgs) -> Result<SendResult, AdapterError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let cancel = args.cancel.clone();
        lock(&self.calls).push(args);

        let outcome = lock(&self.script).pop_front();
        match outcome {
            None => Ok(SendResult {
                text: DEFAULT_MOCK_TEXT.to_string(),
                status: Some(200),
                ..Default::default()
            }),
            Some(MockOutcome::Text(text)) => Ok(SendResult {
                text,
                request_id: Some(format!("mock-{}", self.call_count())),
                status: Some(200),
                ..Default::default()
            }),
            Some(MockOutcome::Fail(err)) => Err(AdapterError::Normalized(err)),
            Some(MockOutcome::Raw(raw)) => Err(AdapterError::Raw(raw)),
            Some(MockOutcome::Cancelled) => Err(AdapterError::Cancelled),
            Some(MockOutcome::WaitForCancel) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(AdapterError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_secs(30)) => {
                        Err(AdapterError::Normalized(LlmError::network(self.id, "mock timed out waiting for cancel")))
                    }
                }
            }
        }
    }

    fn normalize_error(&self, raw: &RawFailure) -> LlmError {
        match raw {
            RawFailure::NoResponse { .. } => LlmError::network(self.id, "mock network failure"),
            RawFailure::Status { status, .. } => {
                let kind = match status {
                    401 | 403 => ErrorKind::Auth,
                    413 => ErrorKind::ContextTooLarge,
                    429 => ErrorKind::RateLimit,
                    _ => ErrorKind::Unknown,
                };
                LlmError::new(kind, self.id, "mock failure").with_status(*status)
            }
        }
    }

    async fn list_models(&self, _api_key: &str, cancel: &CancellationToken) -> Result<Vec<ModelItem>, AdapterError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(AdapterError::Cancelled);
        }
        lock(&self.models).clone().map_err(AdapterError::Normalized)
    }
}
