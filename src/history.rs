//! Volatile chat history.
//!
//! Lives for the process only. The caller records a user/assistant pair after
//! each successful send and hands a [`ChatHistory::snapshot`] to the router on
//! the next one; the router filters it by provider.

use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Local, Utc};

use crate::registry::ProviderId;
use crate::traits::{ChatRole, HistoryEntry};

const RULE_WIDTH: usize = 10;

/// Append-only conversation log shared across sends.
#[derive(Debug, Default)]
pub struct ChatHistory {
    entries: RwLock<Vec<HistoryEntry>>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: HistoryEntry) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).push(entry);
    }

    /// Record one completed exchange.
    pub fn record(&self, provider: ProviderId, model: &str, prompt: &str, answer: &str) {
        let now = Utc::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.push(HistoryEntry::new(ChatRole::User, prompt, provider, model).with_timestamp(now));
        entries.push(HistoryEntry::new(ChatRole::Assistant, answer, provider, model).with_timestamp(now));
    }

    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render every entry for display, in local time.
    pub fn format(&self) -> String {
        format_entries(&self.snapshot(), |ts| ts.with_timezone(&Local).format("%H:%M:%S").to_string())
    }
}

/// Render entries with a caller-chosen timestamp format.
pub fn format_entries(entries: &[HistoryEntry], time: impl Fn(&DateTime<Utc>) -> String) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    entries
        .iter()
        .map(|entry| {
            let role = match entry.role {
                ChatRole::User => "User",
                ChatRole::Assistant => "Assistant",
            };
            format!(
                "{rule}\n**{role} ({}/{}) [{}]:**\n{}\n{rule}\n",
                entry.provider.label(),
                entry.model,
                time(&entry.timestamp),
                entry.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
