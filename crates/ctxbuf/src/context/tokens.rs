//! Token accounting for messages.
//!
//! The buffer only needs two things from a tokenizer: the cost of one
//! message and the cost of a sequence. [`TokenCounter`] captures that
//! contract. Implementations must be pure and must never fail; content they
//! cannot make sense of gets a best-effort estimate.
//!
//! [`CharEstimator`] is the default: a characters-per-token ratio plus a
//! fixed per-message overhead for the role and delimiters of the wire format.

use crate::{ContentBlock, Message, MessageContent, MessageRole};
use std::sync::Arc;

/// Default characters per token (conservative estimate for English text).
/// Most tokenizers average 3-4 chars per token; we use 3.5 as a middle ground.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Tokens charged per message for role name, delimiters, and formatting.
pub const DEFAULT_MESSAGE_OVERHEAD: usize = 4;

/// Prices messages in tokens.
///
/// `cost_of` may differ from the sum of `cost` (for example to account for a
/// fixed system-prompt overhead), but appending a message must never lower it.
pub trait TokenCounter: Send + Sync {
    /// Token cost of a single message.
    fn cost(&self, message: &Message) -> usize;

    /// Token cost of an ordered sequence of messages.
    fn cost_of(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.cost(m)).sum()
    }
}

impl<T: TokenCounter + ?Sized> TokenCounter for Arc<T> {
    fn cost(&self, message: &Message) -> usize {
        (**self).cost(message)
    }

    fn cost_of(&self, messages: &[Message]) -> usize {
        (**self).cost_of(messages)
    }
}

impl<T: TokenCounter + ?Sized> TokenCounter for Box<T> {
    fn cost(&self, message: &Message) -> usize {
        (**self).cost(message)
    }

    fn cost_of(&self, messages: &[Message]) -> usize {
        (**self).cost_of(messages)
    }
}

// ── Character-ratio estimator ─────────────────────────────────────

/// Character-ratio token estimator.
///
/// Counts the bytes of everything that ends up on the wire for a message
/// (text, tool-call ids, names and arguments, result ids, tool inputs) and
/// divides by `chars_per_token`, rounding up. Image blocks cost nothing.
#[derive(Debug, Clone)]
pub struct CharEstimator {
    chars_per_token: f64,
    message_overhead: usize,
    system_overhead: usize,
}

impl Default for CharEstimator {
    fn default() -> Self {
        Self {
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            message_overhead: DEFAULT_MESSAGE_OVERHEAD,
            system_overhead: 0,
        }
    }
}

impl CharEstimator {
    /// Create an estimator with a calibrated chars-per-token ratio measured
    /// against real API usage. `None`, zero, negative, or non-finite ratios
    /// fall back to the default.
    pub fn with_calibration(calibrated_cpt: Option<f64>) -> Self {
        let chars_per_token = calibrated_cpt
            .filter(|r| r.is_finite() && *r > 0.0)
            .unwrap_or(DEFAULT_CHARS_PER_TOKEN);
        Self {
            chars_per_token,
            ..Default::default()
        }
    }

    /// Pick a ratio by model family.
    ///
    /// The larger-vocabulary encodings used by `gpt-4o` and the `o` series
    /// pack more characters into each token than `cl100k`-era models.
    pub fn for_model(model: &str) -> Self {
        let model = model.to_ascii_lowercase();
        let ratio = if model.contains("gpt-4o") || model.starts_with("o1") || model.starts_with("o3")
        {
            4.0
        } else if model.contains("gpt-4") || model.contains("gpt-3.5") {
            3.7
        } else {
            DEFAULT_CHARS_PER_TOKEN
        };
        Self::with_calibration(Some(ratio))
    }

    /// Set the per-message overhead in tokens.
    pub fn with_message_overhead(mut self, tokens: usize) -> Self {
        self.message_overhead = tokens;
        self
    }

    /// Set a one-off overhead charged by [`cost_of`](TokenCounter::cost_of)
    /// when the sequence starts with a system message.
    pub fn with_system_overhead(mut self, tokens: usize) -> Self {
        self.system_overhead = tokens;
        self
    }

    /// The chars-per-token ratio in use.
    pub fn chars_per_token(&self) -> f64 {
        self.chars_per_token
    }

    fn message_chars(message: &Message) -> usize {
        let mut chars = match &message.content {
            None => 0,
            Some(MessageContent::Text(text)) => text.len(),
            Some(MessageContent::Blocks(blocks)) => blocks.iter().map(block_chars).sum(),
        };
        if let Some(calls) = &message.tool_calls {
            chars += calls
                .iter()
                .map(|c| c.id.len() + c.function.name.len() + c.function.arguments.len())
                .sum::<usize>();
        }
        if let Some(id) = &message.tool_call_id {
            chars += id.len();
        }
        chars
    }
}

fn block_chars(block: &ContentBlock) -> usize {
    match block {
        ContentBlock::Text { text } => text.len(),
        ContentBlock::ToolUse { id, name, input } => id.len() + name.len() + json_len(input),
        ContentBlock::ToolResult {
            tool_use_id,
            content,
        } => tool_use_id.len() + json_len(content),
        ContentBlock::Image { .. } | ContentBlock::Other => 0,
    }
}

fn json_len(value: &serde_json::Value) -> usize {
    match value {
        serde_json::Value::Null => 0,
        serde_json::Value::String(s) => s.len(),
        other => serde_json::to_string(other).map_or(0, |s| s.len()),
    }
}

impl TokenCounter for CharEstimator {
    fn cost(&self, message: &Message) -> usize {
        let chars = Self::message_chars(message);
        self.message_overhead + (chars as f64 / self.chars_per_token).ceil() as usize
    }

    fn cost_of(&self, messages: &[Message]) -> usize {
        let body: usize = messages.iter().map(|m| self.cost(m)).sum();
        match messages.first() {
            Some(first) if first.role == MessageRole::System => body + self.system_overhead,
            _ => body,
        }
    }
}

// ── Closure-based counter ─────────────────────────────────────────

/// A [`TokenCounter`] backed by a closure.
///
/// Handy for plugging in an external tokenizer or for tests that want
/// exact, hand-picked costs.
///
/// ```
/// use ctxbuf::context::{FnCounter, TokenCounter};
/// use ctxbuf::Message;
///
/// let counter = FnCounter::new(|m: &Message| m.text_content().len());
/// assert_eq!(counter.cost(&Message::user("abcd")), 4);
/// ```
pub struct FnCounter<F> {
    f: F,
}

impl<F> FnCounter<F>
where
    F: Fn(&Message) -> usize + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> TokenCounter for FnCounter<F>
where
    F: Fn(&Message) -> usize + Send + Sync,
{
    fn cost(&self, message: &Message) -> usize {
        (self.f)(message)
    }
}

impl<F> std::fmt::Debug for FnCounter<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCounter").finish_non_exhaustive()
    }
}
