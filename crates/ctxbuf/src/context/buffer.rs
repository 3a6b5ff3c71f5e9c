//! The token-bounded conversation buffer.
//!
//! [`ContextBuffer`] owns the conversation in order, caches the token cost of
//! every message, and runs one batch eviction whenever an append pushes the
//! total over `max_tokens`. After every call the buffer is back within budget,
//! unless the newest message (or the tool sequence it closes) is too large
//! on its own; that state is reported through [`ContextStats::is_at_capacity`]
//! and [`EvictionReport::over_budget`], never as an error.
//!
//! # Example
//!
//! ```
//! use ctxbuf::prelude::*;
//!
//! let counter = FnCounter::new(|m: &Message| m.text_content().len());
//! let mut buffer = ContextBuffer::new(BufferConfig::new(1_000).with_batch_remove_fraction(0.25))
//!     .with_counter(counter);
//!
//! for i in 0..10 {
//!     buffer.add_message(Message::user(format!("{i}").repeat(100)));
//! }
//! let outcome = buffer.add_message(Message::user("x".repeat(100)));
//!
//! let report = outcome.eviction.expect("11th message goes over budget");
//! assert!(report.freed_tokens >= 250);
//! assert!(buffer.stats().total_tokens <= 1_000);
//! ```

use crate::Message;
use crate::config::BufferConfig;
use crate::context::eviction::plan_batch_eviction;
use crate::context::summarizer::EvictionSummaries;
use crate::context::tokens::{CharEstimator, TokenCounter};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

// ── Stats ──────────────────────────────────────────────────────────

/// Snapshot of buffer usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextStats {
    /// Messages currently held.
    pub message_count: usize,
    /// Token cost of the held messages.
    pub total_tokens: usize,
    /// The configured budget.
    pub max_tokens: usize,
    /// `max_tokens - total_tokens`, floored at zero.
    pub remaining_tokens: usize,
    /// True when `total_tokens >= max_tokens`.
    pub is_at_capacity: bool,
}

impl ContextStats {
    /// Usage as a fraction of the budget (0.0 to 1.0+).
    pub fn usage_pct(&self) -> f64 {
        if self.max_tokens == 0 {
            1.0
        } else {
            self.total_tokens as f64 / self.max_tokens as f64
        }
    }

    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "context: {} messages, {} tokens ({:.0}% of {})",
            self.message_count,
            self.total_tokens,
            self.usage_pct() * 100.0,
            self.max_tokens,
        )
    }
}

// ── Add outcome ────────────────────────────────────────────────────

/// What one eviction trigger did.
#[derive(Debug, Clone)]
pub struct EvictionReport {
    /// Removed messages, in conversation order.
    pub removed: Vec<Message>,
    /// Sum of the per-message costs of the removed messages.
    pub freed_tokens: usize,
    /// Tokens the trigger aimed to free: the overshoot plus the batch size.
    pub target_tokens: usize,
    /// Sweeps the planner made over the buffer.
    pub sweeps: usize,
    /// Total before eviction.
    pub tokens_before: usize,
    /// Total after eviction.
    pub tokens_after: usize,
    /// The budget at the time of the trigger.
    pub max_tokens: usize,
}

impl EvictionReport {
    /// True if the buffer is still over budget after eviction converged.
    pub fn over_budget(&self) -> bool {
        self.tokens_after > self.max_tokens
    }

    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "evicted {} messages, freed {} tokens (target {}), {} -> {} of {}",
            self.removed.len(),
            self.freed_tokens,
            self.target_tokens,
            self.tokens_before,
            self.tokens_after,
            self.max_tokens,
        )
    }
}

/// Result of [`ContextBuffer::add_messages`].
#[derive(Debug, Clone, Default)]
pub struct AddOutcome {
    /// Number of messages appended.
    pub added: usize,
    /// Present when the append pushed the buffer over budget.
    pub eviction: Option<EvictionReport>,
}

impl AddOutcome {
    /// True if any message was removed.
    pub fn truncated(&self) -> bool {
        self.eviction.as_ref().is_some_and(|e| !e.removed.is_empty())
    }

    /// Messages removed by this call.
    pub fn removed(&self) -> &[Message] {
        match &self.eviction {
            Some(report) => &report.removed,
            None => &[],
        }
    }
}

// ── Buffer ─────────────────────────────────────────────────────────

/// An ordered, token-bounded list of conversation messages.
pub struct ContextBuffer {
    config: BufferConfig,
    counter: Box<dyn TokenCounter>,
    messages: Vec<Message>,
    /// `costs[i]` is `counter.cost(&messages[i])`.
    costs: Vec<usize>,
    total_tokens: usize,
    summaries: Option<EvictionSummaries>,
    eviction_count: usize,
}

impl std::fmt::Debug for ContextBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextBuffer")
            .field("config", &self.config)
            .field("messages", &self.messages.len())
            .field("total_tokens", &self.total_tokens)
            .field("eviction_count", &self.eviction_count)
            .finish_non_exhaustive()
    }
}

impl Default for ContextBuffer {
    fn default() -> Self {
        Self::new(BufferConfig::default())
    }
}

impl ContextBuffer {
    /// Create an empty buffer priced with the default [`CharEstimator`].
    pub fn new(config: BufferConfig) -> Self {
        let summaries = config
            .summaries
            .enabled
            .then(|| EvictionSummaries::new(config.summaries.config.clone()));
        Self {
            config,
            counter: Box::new(CharEstimator::default()),
            messages: Vec::new(),
            costs: Vec::new(),
            total_tokens: 0,
            summaries,
            eviction_count: 0,
        }
    }

    /// Price messages with `counter` instead. Messages already held are
    /// re-priced; the budget is enforced on the next append.
    pub fn with_counter(mut self, counter: impl TokenCounter + 'static) -> Self {
        self.counter = Box::new(counter);
        self.costs = self.messages.iter().map(|m| self.counter.cost(m)).collect();
        self.total_tokens = self.counter.cost_of(&self.messages);
        self
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    pub fn max_tokens(&self) -> usize {
        self.config.max_tokens
    }

    /// Append one message. See [`add_messages`](Self::add_messages).
    pub fn add_message(&mut self, message: Message) -> AddOutcome {
        self.add_messages([message])
    }

    /// Append messages in order, then evict one batch if the buffer went over
    /// budget.
    pub fn add_messages(&mut self, new_messages: impl IntoIterator<Item = Message>) -> AddOutcome {
        let original_len = self.messages.len();
        for msg in new_messages {
            self.costs.push(self.counter.cost(&msg));
            self.messages.push(msg);
        }
        let added = self.messages.len() - original_len;
        self.total_tokens = self.counter.cost_of(&self.messages);

        debug!(
            added,
            messages = self.messages.len(),
            total_tokens = self.total_tokens,
            max_tokens = self.config.max_tokens,
            "add_messages"
        );

        if self.total_tokens <= self.config.max_tokens {
            return AddOutcome {
                added,
                eviction: None,
            };
        }

        let report = self.evict_batch();
        AddOutcome {
            added,
            eviction: Some(report),
        }
    }

    fn evict_batch(&mut self) -> EvictionReport {
        let tokens_before = self.total_tokens;
        let overshoot = tokens_before.saturating_sub(self.config.max_tokens);
        let target = overshoot + self.config.batch_remove_tokens();

        let plan = plan_batch_eviction(&self.messages, &self.costs, target, &self.config);

        let mut removed = Vec::with_capacity(plan.remove.len());
        if !plan.is_empty() {
            let mut doomed = plan.remove.iter().copied().peekable();
            let messages = std::mem::take(&mut self.messages);
            let costs = std::mem::take(&mut self.costs);
            for (i, (msg, cost)) in messages.into_iter().zip(costs).enumerate() {
                if doomed.peek() == Some(&i) {
                    doomed.next();
                    removed.push(msg);
                } else {
                    self.messages.push(msg);
                    self.costs.push(cost);
                }
            }
            self.eviction_count += 1;
        }
        self.total_tokens = self.counter.cost_of(&self.messages);

        let report = EvictionReport {
            removed,
            freed_tokens: plan.freed,
            target_tokens: target,
            sweeps: plan.sweeps,
            tokens_before,
            tokens_after: self.total_tokens,
            max_tokens: self.config.max_tokens,
        };

        if report.removed.is_empty() {
            warn!(
                total_tokens = self.total_tokens,
                max_tokens = self.config.max_tokens,
                messages = self.messages.len(),
                "over budget but nothing can be evicted"
            );
        } else {
            info!(
                removed = report.removed.len(),
                freed_tokens = report.freed_tokens,
                target_tokens = report.target_tokens,
                sweeps = report.sweeps,
                tokens_before = report.tokens_before,
                tokens_after = report.tokens_after,
                "batch eviction"
            );
            if report.over_budget() {
                warn!(
                    total_tokens = self.total_tokens,
                    max_tokens = self.config.max_tokens,
                    "still over budget after eviction"
                );
            }
        }

        report
    }

    /// The held messages, in conversation order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// An owned copy of the conversation for the next model request.
    ///
    /// When summaries are enabled and at least one was recorded, the rendered
    /// summaries are inserted as a user message right after the leading
    /// system messages.
    pub fn to_messages(&self) -> Vec<Message> {
        let Some(preamble) = self.summaries.as_ref().and_then(EvictionSummaries::render) else {
            return self.messages.clone();
        };
        let split = self
            .messages
            .iter()
            .take_while(|m| m.role == crate::MessageRole::System)
            .count();
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        out.extend_from_slice(&self.messages[..split]);
        out.push(Message::user(preamble));
        out.extend_from_slice(&self.messages[split..]);
        out
    }

    /// Remove every message and recorded summary.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.costs.clear();
        self.total_tokens = 0;
        if let Some(summaries) = self.summaries.as_mut() {
            summaries.clear();
        }
        debug!("context cleared");
    }

    /// Current usage.
    pub fn stats(&self) -> ContextStats {
        let max_tokens = self.config.max_tokens;
        ContextStats {
            message_count: self.messages.len(),
            total_tokens: self.total_tokens,
            max_tokens,
            remaining_tokens: max_tokens.saturating_sub(self.total_tokens),
            is_at_capacity: self.total_tokens >= max_tokens,
        }
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of eviction triggers that removed at least one message.
    pub fn eviction_count(&self) -> usize {
        self.eviction_count
    }

    /// The summary log, if summaries are enabled.
    pub fn summaries(&self) -> Option<&EvictionSummaries> {
        self.summaries.as_ref()
    }

    /// Build the `(system, user)` summarization prompt for evicted messages.
    /// `None` when summaries are disabled.
    pub fn summary_request(&self, evicted: &[Message]) -> Option<(String, String)> {
        self.summaries.as_ref().map(|s| s.build_request(evicted))
    }

    /// Record the summary the model produced for an evicted span. Returns
    /// whether it was kept.
    pub fn record_summary(&mut self, summary: impl Into<String>) -> bool {
        self.summaries.as_mut().is_some_and(|s| s.record(summary))
    }
}

// ── Shared buffer ──────────────────────────────────────────────────

/// A [`ContextBuffer`] behind one exclusive lock, so an observer can poll
/// [`stats`](Self::stats) while the owning loop appends. Each method holds
/// the lock for exactly one buffer call.
#[derive(Clone, Debug)]
pub struct SharedContextBuffer(Arc<Mutex<ContextBuffer>>);

impl SharedContextBuffer {
    pub fn new(buffer: ContextBuffer) -> Self {
        Self(Arc::new(Mutex::new(buffer)))
    }

    fn lock(&self) -> MutexGuard<'_, ContextBuffer> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_messages(&self, new_messages: impl IntoIterator<Item = Message>) -> AddOutcome {
        self.lock().add_messages(new_messages)
    }

    pub fn stats(&self) -> ContextStats {
        self.lock().stats()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// A copy of the held messages.
    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages().to_vec()
    }

    /// Run `f` with the lock held.
    pub fn with_buffer<R>(&self, f: impl FnOnce(&mut ContextBuffer) -> R) -> R {
        f(&mut self.lock())
    }
}
