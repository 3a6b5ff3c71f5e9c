//! Tool-call / tool-result pairing.
//!
//! An assistant message that issues tool calls and the records carrying the
//! results of those calls form one unit: sending a result without its call,
//! or a call without its result, is rejected by every major chat API. The
//! helpers here recognise both shapes in use today:
//!
//! - OpenAI style: `tool_calls` on the assistant message, one `tool` role
//!   message per result linked by `tool_call_id`.
//! - Anthropic style: `tool_use` blocks in the assistant content, answered by
//!   `tool_result` blocks inside a `user` message.
//!
//! [`ToolSequenceIndex`] resolves the links for a whole message list. A
//! result only pairs with an invocation that appears *before* it.

use crate::{ContentBlock, Message, MessageRole};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// True if the message is an assistant message that invokes at least one tool.
pub fn has_tool_calls(msg: &Message) -> bool {
    if msg.role != MessageRole::Assistant {
        return false;
    }
    msg.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
        || msg
            .content_blocks()
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolUse { .. }))
}

/// True if the message carries the result of a tool call.
pub fn is_tool_result(msg: &Message) -> bool {
    match msg.role {
        MessageRole::Tool => msg.tool_call_id.is_some(),
        MessageRole::User => msg
            .content_blocks()
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolResult { .. })),
        _ => false,
    }
}

/// The call ids declared by a tool-invocation message.
pub fn call_ids(msg: &Message) -> BTreeSet<&str> {
    let mut ids = BTreeSet::new();
    if !has_tool_calls(msg) {
        return ids;
    }
    if let Some(calls) = &msg.tool_calls {
        ids.extend(calls.iter().map(|c| c.id.as_str()));
    }
    for block in msg.content_blocks() {
        if let ContentBlock::ToolUse { id, .. } = block {
            ids.insert(id.as_str());
        }
    }
    ids
}

/// The call ids a tool-result message answers, in content order.
pub fn result_ids(msg: &Message) -> Vec<&str> {
    if !is_tool_result(msg) {
        return Vec::new();
    }
    match msg.role {
        MessageRole::Tool => msg.tool_call_id.as_deref().into_iter().collect(),
        _ => msg
            .content_blocks()
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                _ => None,
            })
            .collect(),
    }
}

/// The call id a tool-result message answers (the first one for messages
/// that carry several results).
pub fn matches(msg: &Message) -> Option<&str> {
    result_ids(msg).into_iter().next()
}

/// Pairing links for an ordered list of messages.
///
/// Indices are positions in the list the index was built from (or the
/// indices supplied to [`build_from`](Self::build_from)).
#[derive(Debug, Default)]
pub struct ToolSequenceIndex {
    /// Invocation index -> indices of the results matched to it, ascending.
    results: BTreeMap<usize, Vec<usize>>,
    /// Result index -> invocation indices it answers.
    answers: HashMap<usize, Vec<usize>>,
    /// Invocation index -> number of its call ids with no result yet.
    pending: HashMap<usize, usize>,
    /// Tool-result messages that matched no earlier invocation.
    orphans: BTreeSet<usize>,
}

impl ToolSequenceIndex {
    /// Index a contiguous message list.
    pub fn build(messages: &[Message]) -> Self {
        Self::build_from(messages.iter().enumerate())
    }

    /// Index an ordered subset of messages, keeping their original indices.
    pub fn build_from<'a>(messages: impl IntoIterator<Item = (usize, &'a Message)>) -> Self {
        let mut index = Self::default();
        let mut owner_of_call: HashMap<&'a str, usize> = HashMap::new();
        let mut answered: HashSet<&'a str> = HashSet::new();

        for (i, msg) in messages {
            if has_tool_calls(msg) {
                let ids = call_ids(msg);
                index.pending.insert(i, ids.len());
                index.results.insert(i, Vec::new());
                for id in ids {
                    owner_of_call.insert(id, i);
                    answered.remove(id);
                }
                continue;
            }

            if !is_tool_result(msg) {
                continue;
            }

            let mut owners: Vec<usize> = Vec::new();
            for id in result_ids(msg) {
                let Some(&owner) = owner_of_call.get(id) else {
                    continue;
                };
                if !answered.insert(id) {
                    // A second result for the same call id pairs with nothing.
                    continue;
                }
                if let Some(left) = index.pending.get_mut(&owner) {
                    *left = left.saturating_sub(1);
                }
                if !owners.contains(&owner) {
                    owners.push(owner);
                    index.results.entry(owner).or_default().push(i);
                }
            }

            if owners.is_empty() {
                index.orphans.insert(i);
            } else {
                index.answers.insert(i, owners);
            }
        }

        index
    }

    /// True if `i` is a tool invocation.
    pub fn is_invocation(&self, i: usize) -> bool {
        self.results.contains_key(&i)
    }

    /// True if `i` is a tool result paired with an earlier invocation.
    pub fn is_paired_result(&self, i: usize) -> bool {
        self.answers.contains_key(&i)
    }

    /// True if `i` is a tool result with no invocation before it.
    pub fn is_orphan_result(&self, i: usize) -> bool {
        self.orphans.contains(&i)
    }

    /// True if every call id declared by invocation `i` has a result.
    /// Messages that are not invocations count as complete.
    pub fn is_complete(&self, i: usize) -> bool {
        self.pending.get(&i).is_none_or(|left| *left == 0)
    }

    /// Index of the most recent invocation.
    pub fn latest_invocation(&self) -> Option<usize> {
        self.results.keys().next_back().copied()
    }

    /// The invocations a paired result answers.
    pub fn invocations_of(&self, result: usize) -> &[usize] {
        self.answers.get(&result).map_or(&[][..], Vec::as_slice)
    }

    /// All indices that must be removed together with message `i`, sorted.
    ///
    /// For an invocation this is the invocation plus every matched result.
    /// For a paired result it is the unit of the invocation(s) it answers. A
    /// result block message answering calls from two invocations joins both
    /// units into one. Any other message is a unit on its own.
    pub fn unit_containing(&self, i: usize) -> Vec<usize> {
        let mut unit = BTreeSet::new();
        let mut stack = vec![i];
        while let Some(next) = stack.pop() {
            if !unit.insert(next) {
                continue;
            }
            if let Some(results) = self.results.get(&next) {
                stack.extend(results.iter().copied());
            }
            if let Some(owners) = self.answers.get(&next) {
                stack.extend(owners.iter().copied());
            }
        }
        unit.into_iter().collect()
    }
}
