//! Convenience re-exports for common `ctxbuf` types.
//!
//! Meant to be glob-imported:
//!
//! ```
//! use ctxbuf::prelude::*;
//! ```
//!
//! This pulls in the message types, the buffer and its config, and the token
//! counters. Eviction internals (priority classification, the sequence
//! index) stay in their modules.

// ── Messages ────────────────────────────────────────────────────────
pub use crate::{ContentBlock, Message, MessageContent, MessageRole, ToolCall};

// ── Buffer ──────────────────────────────────────────────────────────
pub use crate::config::{BufferConfig, SummaryConfig, Toggle};
pub use crate::context::{
    AddOutcome, ContextBuffer, ContextStats, EvictionReport, EvictionSummaries,
    SharedContextBuffer,
};

// ── Token accounting ────────────────────────────────────────────────
pub use crate::context::{CharEstimator, FnCounter, TokenCounter};
