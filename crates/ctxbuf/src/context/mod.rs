//! Context window management: token accounting, tool-call pairing, batch
//! eviction, and summaries of what was evicted.
//!
//! 1. **[`tokens`]**: [`TokenCounter`] prices messages. [`CharEstimator`] is a
//!    character-ratio heuristic; swap in a real tokenizer with [`FnCounter`]
//!    or your own implementation.
//!
//! 2. **[`sequence`]**: [`ToolSequenceIndex`] links every tool invocation to
//!    its result records so they can be evicted as one unit.
//!
//! 3. **[`eviction`]**: assigns each message a [`Priority`] and plans which
//!    units to drop when the buffer goes over budget.
//!
//! 4. **[`buffer`]**: [`ContextBuffer`] ties it together: append, evict,
//!    clear, and report [`ContextStats`].
//!
//! 5. **[`summarizer`]**: keeps the most recent summaries of evicted spans
//!    and renders them as a preamble for the next request.

pub mod buffer;
pub mod eviction;
pub mod sequence;
pub mod summarizer;
pub mod tokens;

// Re-export commonly used items at the module level.
pub use buffer::{AddOutcome, ContextBuffer, ContextStats, EvictionReport, SharedContextBuffer};
pub use eviction::Priority;
pub use sequence::ToolSequenceIndex;
pub use summarizer::EvictionSummaries;
pub use tokens::{CharEstimator, DEFAULT_CHARS_PER_TOKEN, FnCounter, TokenCounter};
