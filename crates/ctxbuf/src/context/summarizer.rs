//! Running log of summaries for evicted spans.
//!
//! Eviction throws messages away; a short summary of what was thrown away
//! lets the model keep its bearings. The LLM call itself is the caller's
//! job. This module builds the request for an evicted span, keeps the most
//! recent summaries, and renders them as a numbered preamble that
//! [`ContextBuffer::to_messages`](super::ContextBuffer::to_messages) places
//! ahead of the conversation.

use crate::config::SummaryConfig;
use crate::context::sequence::{call_ids, result_ids};
use crate::{ContentBlock, Message};

/// Instructions for the one-shot summarization call.
const SUMMARIZATION_PROMPT: &str = "\
The following messages were removed from an ongoing conversation to save space. \
Summarize them so the conversation can continue without them. Focus on:
- What the user asked for and what was decided
- Tools that were called and what they returned
- Facts, names, numbers, and file paths that may matter later

Rules:
- Only include facts stated in the messages. Do not infer or extrapolate.
- Be specific and concise. A few sentences is usually enough.";

/// Opening line of the rendered summaries preamble.
const PREAMBLE_HEADER: &str = "Summaries of earlier messages removed from this conversation:";

/// The most recent summaries of evicted spans.
#[derive(Debug, Clone)]
pub struct EvictionSummaries {
    summaries: Vec<String>,
    config: SummaryConfig,
}

impl EvictionSummaries {
    pub fn new(config: SummaryConfig) -> Self {
        Self {
            summaries: Vec::new(),
            config,
        }
    }

    /// Build a `(system, user)` prompt pair summarizing `span`.
    ///
    /// Each message is reduced to one line and truncated to
    /// `max_chars_per_message` characters.
    pub fn build_request(&self, span: &[Message]) -> (String, String) {
        let limit = self.config.max_chars_per_message;
        let mut content = String::new();

        for msg in span {
            let ids = call_ids(msg);
            let label = if !ids.is_empty() {
                format!(
                    "{} calling {}",
                    msg.role,
                    ids.into_iter().collect::<Vec<_>>().join(", ")
                )
            } else if !result_ids(msg).is_empty() {
                format!("result for {}", result_ids(msg).join(", "))
            } else {
                msg.role.to_string()
            };
            let text = truncate_chars(&describe(msg), limit);
            content.push_str(&format!("[{label}]: {text}\n"));
        }

        (SUMMARIZATION_PROMPT.to_string(), content)
    }

    /// Record a summary. Blank summaries are ignored. Returns whether the
    /// summary was kept.
    pub fn record(&mut self, summary: impl Into<String>) -> bool {
        let summary = summary.into();
        let summary = summary.trim();
        if summary.is_empty() {
            return false;
        }
        self.summaries.push(summary.to_string());
        let keep = self.config.keep_last.max(1);
        if self.summaries.len() > keep {
            let excess = self.summaries.len() - keep;
            self.summaries.drain(..excess);
        }
        true
    }

    /// Render the kept summaries as a numbered list inside `<summaries>`
    /// tags, or `None` if there are none.
    pub fn render(&self) -> Option<String> {
        if self.summaries.is_empty() {
            return None;
        }
        let numbered: Vec<String> = self
            .summaries
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}. {s}", i + 1))
            .collect();
        Some(format!(
            "{PREAMBLE_HEADER}\n<summaries>\n{}\n</summaries>",
            numbered.join("\n")
        ))
    }

    /// The kept summaries, oldest first.
    pub fn recent(&self) -> &[String] {
        &self.summaries
    }

    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }

    pub fn clear(&mut self) {
        self.summaries.clear();
    }
}

/// One-line description of a message's payload: its text, plus tool names
/// and arguments for invocations.
fn describe(msg: &Message) -> String {
    let mut parts: Vec<String> = Vec::new();
    let text = msg.text_content();
    if !text.trim().is_empty() {
        parts.push(text.trim().to_string());
    }
    if let Some(calls) = &msg.tool_calls {
        for call in calls {
            parts.push(format!("{}({})", call.function.name, call.function.arguments));
        }
    }
    for block in msg.content_blocks() {
        match block {
            ContentBlock::ToolUse { name, input, .. } => parts.push(format!("{name}({input})")),
            ContentBlock::ToolResult { content, .. } => match content {
                serde_json::Value::String(s) => parts.push(s.clone()),
                serde_json::Value::Null => {}
                other => parts.push(other.to_string()),
            },
            ContentBlock::Image { .. } => parts.push("[image]".to_string()),
            ContentBlock::Text { .. } | ContentBlock::Other => {}
        }
    }
    if parts.is_empty() {
        "[no content]".to_string()
    } else {
        parts.join(" ").replace('\n', " ")
    }
}

/// Truncate to at most `max_chars` characters, marking the cut with `...`.
fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}
