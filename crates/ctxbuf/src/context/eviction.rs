//! Batch eviction: decide which messages leave the buffer when it goes over
//! budget.
//!
//! Every message gets a [`Priority`]. Eviction sweeps the buffer once per
//! class, `Low` then `Medium` then `High`, oldest first within a class, and
//! keeps removing until the freed tokens reach the batch target. Removing a
//! whole batch per trigger keeps the work linear in the buffer size instead
//! of re-checking the budget after every single message.
//!
//! Tool sequences are atomic. Picking an invocation removes it together with
//! every matched result. A paired result is never picked on its own: the
//! sweep skips it and moves to the next candidate.
//!
//! The newest message and the tool unit it belongs to are never evicted, so
//! a buffer holding one message that alone exceeds the budget keeps it.

use crate::config::BufferConfig;
use crate::context::sequence::{ToolSequenceIndex, has_tool_calls};
use crate::{Message, MessageRole};
use std::collections::BTreeSet;
use tracing::trace;

/// Eviction priority. Lower classes are evicted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Short assistant replies, empty assistant messages, and tool records
    /// that pair with nothing.
    Low,
    /// User turns, substantive assistant replies, settled tool sequences.
    Medium,
    /// System messages and the tool sequence still in play.
    High,
}

impl Priority {
    /// Classes in eviction order.
    pub const SWEEP_ORDER: [Priority; 3] = [Priority::Low, Priority::Medium, Priority::High];
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
        }
    }
}

/// Classify message `i`.
///
/// - `High`: system messages; an invocation that still waits for a result or
///   is the most recent invocation in the buffer.
/// - `Medium`: user messages; other invocations and paired results; plain
///   assistant replies longer than `low_information_chars`.
/// - `Low`: plain assistant replies at or under the threshold (including
///   empty ones) and tool results that pair with nothing, including `tool`
///   messages missing their `tool_call_id`.
pub fn classify(
    messages: &[Message],
    index: &ToolSequenceIndex,
    i: usize,
    config: &BufferConfig,
) -> Priority {
    let msg = &messages[i];
    match msg.role {
        MessageRole::System => Priority::High,
        MessageRole::Assistant if has_tool_calls(msg) => {
            if !index.is_complete(i) || index.latest_invocation() == Some(i) {
                Priority::High
            } else {
                Priority::Medium
            }
        }
        MessageRole::Assistant => {
            let chars = msg.text_content().trim().chars().count();
            if chars > config.low_information_chars {
                Priority::Medium
            } else {
                Priority::Low
            }
        }
        MessageRole::User | MessageRole::Tool if index.is_paired_result(i) => Priority::Medium,
        MessageRole::User if index.is_orphan_result(i) => Priority::Low,
        MessageRole::User => Priority::Medium,
        MessageRole::Tool => Priority::Low,
    }
}

/// The outcome of planning one eviction trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionPlan {
    /// Indices to remove, ascending.
    pub remove: Vec<usize>,
    /// Sum of the per-message costs of the removed messages.
    pub freed: usize,
    /// Number of sweeps over the buffer.
    pub sweeps: usize,
}

impl EvictionPlan {
    pub fn is_empty(&self) -> bool {
        self.remove.is_empty()
    }
}

/// Plan one batch eviction that frees at least `target` tokens.
///
/// `costs[i]` is the token cost of `messages[i]`. The plan stops as soon as
/// the target is met, or when a full sweep removes nothing; in that case it
/// frees as much as the pairing rules and the newest-message floor allow.
pub fn plan_batch_eviction(
    messages: &[Message],
    costs: &[usize],
    target: usize,
    config: &BufferConfig,
) -> EvictionPlan {
    debug_assert_eq!(messages.len(), costs.len());
    let mut plan = EvictionPlan::default();
    if messages.is_empty() || target == 0 {
        return plan;
    }

    let floor: BTreeSet<usize> = ToolSequenceIndex::build(messages)
        .unit_containing(messages.len() - 1)
        .into_iter()
        .collect();
    let mut removed = vec![false; messages.len()];

    'passes: loop {
        // Reclassify what is left at the start of every sweep so "latest
        // invocation" and pairing reflect the surviving messages.
        let index = ToolSequenceIndex::build_from(
            messages.iter().enumerate().filter(|(i, _)| !removed[*i]),
        );
        let classes: Vec<Option<Priority>> = (0..messages.len())
            .map(|i| (!removed[i]).then(|| classify(messages, &index, i, config)))
            .collect();

        plan.sweeps += 1;
        let mut progressed = false;

        for class in Priority::SWEEP_ORDER {
            for i in 0..messages.len() {
                if plan.freed >= target {
                    break 'passes;
                }
                if removed[i] || classes[i] != Some(class) || floor.contains(&i) {
                    continue;
                }

                if index.is_paired_result(i) {
                    trace!(index = i, "skipping tool result whose invocation stays");
                    continue;
                }

                let unit = if index.is_invocation(i) {
                    index.unit_containing(i)
                } else {
                    vec![i]
                };
                if unit.iter().any(|u| floor.contains(u)) {
                    continue;
                }

                let mut unit_tokens = 0;
                for &u in &unit {
                    if !removed[u] {
                        removed[u] = true;
                        unit_tokens += costs[u];
                    }
                }
                plan.freed += unit_tokens;
                progressed = true;
                trace!(
                    index = i,
                    priority = %class,
                    messages = unit.len(),
                    tokens = unit_tokens,
                    "evicting unit"
                );
            }
        }

        if !progressed {
            break;
        }
    }

    plan.remove = removed
        .iter()
        .enumerate()
        .filter_map(|(i, gone)| gone.then_some(i))
        .collect();
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolCall;

    fn config() -> BufferConfig {
        BufferConfig::new(1000)
    }

    fn invocation(id: &str) -> Message {
        Message::assistant_tool_calls(vec![ToolCall::function(id, "test_tool", "{}")])
    }

    fn classes(messages: &[Message]) -> Vec<Priority> {
        let index = ToolSequenceIndex::build(messages);
        (0..messages.len())
            .map(|i| classify(messages, &index, i, &config()))
            .collect()
    }

    #[test]
    fn classification() {
        let messages = vec![
            Message::system("System message"),
            Message::user("Query 1"),
            Message::assistant_text("Short"),
            Message::assistant_text("A".repeat(201)),
            Message::assistant_text("A".repeat(200)),
            invocation("c1"),
            Message::tool_result("c1", "result"),
            invocation("c2"),
            Message::tool_result("c2", "result"),
            Message::tool_result("nobody", "orphan"),
        ];
        use Priority::*;
        assert_eq!(
            classes(&messages),
            vec![High, Medium, Low, Medium, Low, Medium, Medium, High, Medium, Low]
        );
    }

    #[test]
    fn pending_invocation_is_high() {
        let messages = vec![
            invocation("c1"),
            invocation("c2"),
            Message::tool_result("c2", "done"),
        ];
        let got = classes(&messages);
        assert_eq!(got[0], Priority::High);
        assert_eq!(got[1], Priority::High);
    }

    #[test]
    fn malformed_tool_message_is_low() {
        let mut msg = Message::tool_result("c1", "x");
        msg.tool_call_id = None;
        assert_eq!(classes(&[msg]), vec![Priority::Low]);
    }

    #[test]
    fn low_goes_before_medium_regardless_of_age() {
        let messages = vec![
            Message::user("old question"),
            Message::assistant_text("ok"),
            Message::user("newest"),
        ];
        let plan = plan_batch_eviction(&messages, &[100, 100, 100], 100, &config());
        assert_eq!(plan.remove, vec![1]);
        assert_eq!(plan.freed, 100);
        assert_eq!(plan.sweeps, 1);
    }

    #[test]
    fn oldest_first_within_class() {
        let messages = vec![
            Message::user("a"),
            Message::user("b"),
            Message::user("c"),
            Message::user("d"),
        ];
        let plan = plan_batch_eviction(&messages, &[10, 10, 10, 10], 15, &config());
        assert_eq!(plan.remove, vec![0, 1]);
        assert_eq!(plan.freed, 20);
    }

    #[test]
    fn invocation_takes_its_results() {
        let messages = vec![
            Message::user("q"),
            invocation("c1"),
            Message::tool_result("c1", "r"),
            Message::user("q2"),
            invocation("c2"),
            Message::tool_result("c2", "r"),
            Message::user("newest"),
        ];
        let costs = [10, 10, 10, 10, 10, 10, 10];
        // Medium sweep: user 0, then invocation 1 with result 2.
        let plan = plan_batch_eviction(&messages, &costs, 25, &config());
        assert_eq!(plan.remove, vec![0, 1, 2]);
        assert_eq!(plan.freed, 30);
    }

    #[test]
    fn result_is_skipped_while_invocation_stays() {
        let messages = vec![
            invocation("c1"),
            Message::tool_result("c1", "r"),
            Message::user("u"),
            Message::user("newest"),
        ];
        let plan = plan_batch_eviction(&messages, &[100, 100, 200, 200], 200, &config());
        assert_eq!(plan.remove, vec![2]);
    }

    #[test]
    fn newest_message_is_never_evicted() {
        let messages = vec![Message::user("huge")];
        let plan = plan_batch_eviction(&messages, &[5000], 4000, &config());
        assert!(plan.is_empty());
        assert_eq!(plan.sweeps, 1);
    }

    #[test]
    fn newest_tool_unit_is_never_evicted() {
        let messages = vec![
            Message::system("sys"),
            invocation("c1"),
            Message::tool_result("c1", "huge"),
        ];
        let plan = plan_batch_eviction(&messages, &[10, 10, 5000], 5000, &config());
        assert_eq!(plan.remove, vec![0]);
        assert_eq!(plan.freed, 10);
    }

    #[test]
    fn exhausts_all_classes_when_needed() {
        let messages = vec![
            Message::system("sys"),
            Message::user("u"),
            Message::assistant_text("ok"),
            Message::user("newest"),
        ];
        let plan = plan_batch_eviction(&messages, &[10, 10, 10, 10], 1000, &config());
        assert_eq!(plan.remove, vec![0, 1, 2]);
        assert_eq!(plan.freed, 30);
        // Second sweep finds nothing left and ends the loop.
        assert_eq!(plan.sweeps, 2);
    }

    #[test]
    fn zero_target_is_a_no_op() {
        let messages = vec![Message::user("a"), Message::user("b")];
        let plan = plan_batch_eviction(&messages, &[10, 10], 0, &config());
        assert!(plan.is_empty());
        assert_eq!(plan.sweeps, 0);
    }
}
