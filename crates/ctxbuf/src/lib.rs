//! Token-bounded conversation context for LLM agents.
//!
//! `ctxbuf` keeps the running list of chat messages an agent sends with every
//! request, including multi-step tool-call / tool-result sequences, under a
//! fixed token budget. When the budget is exceeded it evicts a whole batch of
//! messages at once, lowest priority and oldest first, and never separates a
//! tool call from its result.
//!
//! # Getting started
//!
//! ```
//! use ctxbuf::prelude::*;
//!
//! let mut buffer = ContextBuffer::new(BufferConfig::new(1_000).with_batch_remove_fraction(0.25));
//!
//! buffer.add_messages([
//!     Message::system("You are a helpful assistant."),
//!     Message::user("What is the weather in Paris?"),
//! ]);
//! buffer.add_messages([
//!     Message::assistant_tool_calls(vec![ToolCall::function(
//!         "call_1",
//!         "check_weather",
//!         r#"{"city":"Paris"}"#,
//!     )]),
//!     Message::tool_result("call_1", r#"{"temperature":"18C"}"#),
//! ]);
//!
//! let stats = buffer.stats();
//! assert_eq!(stats.message_count, 4);
//! assert!(!stats.is_at_capacity);
//! ```
//!
//! # Where to find things
//!
//! - **The buffer itself:** [`ContextBuffer`](context::ContextBuffer) and its
//!   thread-safe wrapper [`SharedContextBuffer`](context::SharedContextBuffer).
//! - **Token accounting:** the [`TokenCounter`](context::TokenCounter) trait,
//!   with [`CharEstimator`](context::CharEstimator) as the default and
//!   [`FnCounter`](context::FnCounter) for plugging in a real tokenizer.
//! - **Tool-call pairing:** [`context::sequence`].
//! - **Eviction order:** [`context::eviction`].
//! - **Summaries of evicted spans:** [`context::summarizer`].
//! - **Replaying recorded conversations:** [`replay`] (used by the `ctxbuf` CLI).

pub mod config;
pub mod context;
pub mod prelude;
pub mod replay;

use serde::{Deserialize, Serialize};

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// Message content: plain text or a list of typed blocks.
///
/// Providers that put tool invocations and results inside the content
/// (Anthropic-style `tool_use` / `tool_result` blocks) deserialize into
/// [`MessageContent::Blocks`]; everything else is [`MessageContent::Text`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A typed content block.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: serde_json::Value,
    },
    Image {
        #[serde(default)]
        source: serde_json::Value,
    },
    /// Any block type this crate does not know about.
    #[serde(other)]
    Other,
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(MessageRole::User, content)
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self::text(MessageRole::Assistant, content)
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: None,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(MessageContent::Text(content.into())),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }

    /// A user message made of content blocks (e.g. `tool_result` blocks).
    pub fn user_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self::blocks(MessageRole::User, blocks)
    }

    /// An assistant message made of content blocks (e.g. `tool_use` blocks).
    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self::blocks(MessageRole::Assistant, blocks)
    }

    fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(MessageContent::Text(content.into())),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    fn blocks(role: MessageRole, blocks: Vec<ContentBlock>) -> Self {
        Self {
            role,
            content: Some(MessageContent::Blocks(blocks)),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Content blocks, or an empty slice for plain-text and empty messages.
    pub fn content_blocks(&self) -> &[ContentBlock] {
        match &self.content {
            Some(MessageContent::Blocks(blocks)) => blocks,
            _ => &[],
        }
    }

    /// All human-readable text in the message, with text blocks joined by
    /// newlines. Tool inputs and results carried in blocks are not included.
    pub fn text_content(&self) -> String {
        match &self.content {
            None => String::new(),
            Some(MessageContent::Text(text)) => text.clone(),
            Some(MessageContent::Blocks(blocks)) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

// ── Tool types ─────────────────────────────────────────────────────

/// The type of a tool call. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum CallType {
    #[serde(rename = "function")]
    Function,
}

/// A tool invocation issued by the assistant.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub function: FunctionCallData,
}

impl ToolCall {
    /// Create a function-calling tool invocation.
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            call_type: CallType::Function,
            function: FunctionCallData {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FunctionCallData {
    pub name: String,
    pub arguments: String,
}
