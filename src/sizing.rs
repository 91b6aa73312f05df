//! Character-based request sizing and head/tail truncation.
//!
//! Sizes are measured in Unicode scalar values (`char`s), never bytes, so a
//! truncation can never split a multi-byte character.
//!
//! ```text
//!   "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
//!                                   │ truncate_head_tail(text, 40)
//!                                   ▼
//!   "aaaaaaaaaa" + "\n...[TRUNCATED]...\n" + "aaaaaaaaaaa"
//!    └─ head ──┘                              └── tail ─┘
//! ```

use crate::traits::ChatMessage;

/// Marker inserted between the kept head and tail.
pub const DEFAULT_TRUNCATION_MARKER: &str = "\n...[TRUNCATED]...\n";

/// Default share of the budget given to the head.
pub const DEFAULT_HEAD_RATIO: f64 = 0.5;

// ============================================================================
// Counting
// ============================================================================

/// Character counts for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharCounts {
    pub system_chars: usize,
    pub messages_chars: usize,
    pub total_chars: usize,
}

/// Count characters in the system text and every message body.
pub fn count_request_chars(system: &str, messages: &[ChatMessage]) -> CharCounts {
    let system_chars = char_len(system);
    let messages_chars = messages.iter().map(|m| char_len(&m.content)).sum();
    CharCounts {
        system_chars,
        messages_chars,
        total_chars: system_chars + messages_chars,
    }
}

/// Rough token estimate: four characters per token, rounded up.
pub fn estimate_tokens_from_chars(chars: usize) -> usize {
    chars.div_ceil(4)
}

#[inline]
pub(crate) fn char_len(text: &str) -> usize {
    text.chars().count()
}

// ============================================================================
// Truncation
// ============================================================================

/// Options for [`truncate_head_tail`].
#[derive(Debug, Clone, PartialEq)]
pub struct TruncateOptions {
    /// Text placed between head and tail.
    pub marker: String,
    /// Share of the remaining budget kept from the start, clamped to `[0.1, 0.9]`.
    pub head_ratio: f64,
}

impl Default for TruncateOptions {
    fn default() -> Self {
        Self {
            marker: DEFAULT_TRUNCATION_MARKER.to_string(),
            head_ratio: DEFAULT_HEAD_RATIO,
        }
    }
}

impl TruncateOptions {
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    pub fn with_head_ratio(mut self, ratio: f64) -> Self {
        self.head_ratio = ratio;
        self
    }

    fn effective_ratio(&self) -> f64 {
        if self.head_ratio.is_finite() {
            self.head_ratio.clamp(0.1, 0.9)
        } else {
            DEFAULT_HEAD_RATIO
        }
    }
}

/// Result of a truncation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncated {
    pub text: String,
    pub truncated: bool,
}

impl Truncated {
    fn unchanged(text: &str) -> Self {
        Self {
            text: text.to_string(),
            truncated: false,
        }
    }
}

/// Keep the start and end of `text` around a marker so the result has at
/// most `max_chars` characters.
///
/// * `max_chars == 0` yields empty text marked truncated.
/// * Text within the limit is returned unchanged.
/// * A limit too small for the marker falls back to a plain prefix cut.
pub fn truncate_head_tail(text: &str, max_chars: usize, opts: &TruncateOptions) -> Truncated {
    if max_chars == 0 {
        return Truncated {
            text: String::new(),
            truncated: true,
        };
    }

    let len = char_len(text);
    if len <= max_chars {
        return Truncated::unchanged(text);
    }

    let marker_len = char_len(&opts.marker);
    if max_chars <= marker_len + 2 {
        return Truncated {
            text: text.chars().take(max_chars).collect(),
            truncated: true,
        };
    }

    let budget = max_chars - marker_len;
    let head_len = ((budget as f64 * opts.effective_ratio()).floor() as usize).max(1);
    let tail_len = budget.saturating_sub(head_len).max(1);

    let mut out = String::with_capacity(text.len().min(max_chars * 4));
    out.extend(text.chars().take(head_len));
    out.push_str(&opts.marker);
    out.extend(text.chars().skip(len - tail_len));

    Truncated {
        text: out,
        truncated: true,
    }
}
