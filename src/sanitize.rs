//! Debug payload sanitizer.
//!
//! Structured debug events may carry request metadata but must never carry
//! credentials or prompt/response text. [`sanitize_for_debug`] rewrites any
//! JSON value before it reaches a log line:
//!
//! - secret-looking keys (`Authorization`, `x-api-key`, `token`, ...) become `[REDACTED]`
//! - a `headers` object keeps only its key names
//! - every string becomes `[string len=N]`, except short allow-listed metadata
//! - nesting deeper than [`MAX_DEPTH`] becomes `[Truncated]`
//! - arrays keep their first [`MAX_ARRAY_ITEMS`] entries

use serde_json::{Map, Value};
use tracing::debug;

/// Deepest nesting level rendered before `[Truncated]`.
pub const MAX_DEPTH: usize = 4;

/// Array entries kept before a `[+N more]` marker.
pub const MAX_ARRAY_ITEMS: usize = 20;

/// Longest allow-listed string emitted verbatim.
pub const MAX_SAFE_STRING_CHARS: usize = 200;

const SAFE_STRING_KEYS: &[&str] = &[
    "name",
    "code",
    "provider",
    "providerLabel",
    "model",
    "host",
    "path",
    "method",
    "status",
    "requestId",
    "retryAfterSec",
    "errorKind",
    "providerCode",
    "command",
    "endpoint",
    "url",
];

/// Whether `key` names a credential (whole key, case-insensitive).
pub fn is_secret_key(key: &str) -> bool {
    matches!(
        key.to_ascii_lowercase().as_str(),
        "authorization" | "x-api-key" | "x-goog-api-key" | "apikey" | "api-key" | "api_key" | "key" | "token" | "password"
    )
}

/// Return a copy of `input` that is safe to log.
pub fn sanitize_for_debug(input: &Value) -> Value {
    sanitize_at(input, 0)
}

/// Emit a sanitized structured debug event.
pub fn debug_event(event: &str, details: &Value) {
    debug!(details = %sanitize_for_debug(details), "{}", event);
}

fn string_placeholder(s: &str) -> Value {
    Value::String(format!("[string len={}]", s.chars().count()))
}

fn sanitize_at(input: &Value, depth: usize) -> Value {
    if depth > MAX_DEPTH {
        return Value::String("[Truncated]".into());
    }

    match input {
        Value::Null | Value::Bool(_) | Value::Number(_) => input.clone(),
        Value::String(s) => string_placeholder(s),
        Value::Array(items) => {
            if items.is_empty() {
                return Value::Array(Vec::new());
            }
            if depth >= MAX_DEPTH {
                return Value::String(format!("[array len={}]", items.len()));
            }
            let mut out: Vec<Value> = items
                .iter()
                .take(MAX_ARRAY_ITEMS)
                .map(|v| sanitize_at(v, depth + 1))
                .collect();
            if items.len() > out.len() {
                out.push(Value::String(format!("[+{} more]", items.len() - out.len())));
            }
            Value::Array(out)
        }
        Value::Object(map) => Value::Object(sanitize_object(map, depth)),
    }
}

fn sanitize_object(map: &Map<String, Value>, depth: usize) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in map {
        let clean = if is_secret_key(key) {
            Value::String("[REDACTED]".into())
        } else if key.eq_ignore_ascii_case("headers") {
            match value {
                Value::Object(headers) => serde_json::json!({
                    "redacted": true,
                    "keys": headers.keys().cloned().collect::<Vec<_>>(),
                }),
                _ => Value::String("[REDACTED]".into()),
            }
        } else if let Value::String(s) = value {
            if SAFE_STRING_KEYS.contains(&key.as_str()) && s.chars().count() <= MAX_SAFE_STRING_CHARS {
                Value::String(s.clone())
            } else {
                string_placeholder(s)
            }
        } else {
            sanitize_at(value, depth + 1)
        };
        out.insert(key.clone(), clean);
    }
    out
}
