//! End-to-end eviction behaviour through the public API.

use ctxbuf::context::sequence::{call_ids, result_ids};
use ctxbuf::context::ToolSequenceIndex;
use ctxbuf::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeSet, HashSet};

/// Text length plus tool-call argument length.
fn length_cost(m: &Message) -> usize {
    m.text_content().len()
        + m.tool_calls
            .iter()
            .flatten()
            .map(|c| c.function.arguments.len())
            .sum::<usize>()
}

fn buffer(max_tokens: usize, fraction: f64) -> ContextBuffer {
    ContextBuffer::new(BufferConfig::new(max_tokens).with_batch_remove_fraction(fraction))
        .with_counter(FnCounter::new(length_cost))
}

fn invocation(id: &str, args_len: usize) -> Message {
    Message::assistant_tool_calls(vec![ToolCall::function(id, "check_weather", "a".repeat(args_len))])
}

fn assert_pairs_intact(messages: &[Message]) {
    let mut calls = BTreeSet::new();
    let mut results = BTreeSet::new();
    for msg in messages {
        calls.extend(call_ids(msg).into_iter().map(String::from));
        results.extend(result_ids(msg).into_iter().map(String::from));
    }
    assert_eq!(calls, results, "invocation/result pairing broken");
}

#[test]
fn conversation_lifecycle() {
    let mut buffer = buffer(1000, 0.25);

    // Six 100-token messages fit.
    let outcome = buffer.add_messages([
        Message::system("s".repeat(100)),
        Message::user("u".repeat(100)),
        Message::assistant_text("a".repeat(100)),
        Message::user("u".repeat(100)),
        Message::assistant_text("a".repeat(100)),
        Message::user("u".repeat(100)),
    ]);
    assert!(outcome.eviction.is_none());
    assert_eq!(buffer.stats().total_tokens, 600);

    // A 200-token tool pair still fits.
    let outcome = buffer.add_messages([invocation("call_1", 100), Message::tool_result("call_1", "r".repeat(100))]);
    assert!(outcome.eviction.is_none());
    assert_eq!(buffer.stats().total_tokens, 800);

    // Three 200-token messages overshoot by 400: one batch frees at least
    // the overshoot plus 250.
    let outcome = buffer.add_messages((0..3).map(|_| Message::user("q".repeat(200))));
    let report = outcome.eviction.expect("over budget");
    assert_eq!(report.target_tokens, 650);
    assert!(report.freed_tokens >= 250);
    assert!(!report.over_budget());
    assert!(buffer.stats().total_tokens <= 1000);
    assert_pairs_intact(buffer.messages());

    // Short assistant replies went first and the live tool pair stayed.
    assert!(buffer.messages().iter().all(|m| m.role != MessageRole::Assistant || m.tool_calls.is_some()));
    assert!(buffer.messages().iter().any(|m| m.tool_call_id.as_deref() == Some("call_1")));

    buffer.clear();
    assert_eq!(buffer.stats().message_count, 0);
    assert_eq!(buffer.stats().total_tokens, 0);
    buffer.add_message(Message::user("again"));
    assert_eq!(buffer.len(), 1);
}

#[test]
fn paired_result_is_skipped_not_split() {
    let mut buffer = buffer(500, 0.2);
    buffer.add_messages([
        invocation("call_1", 100),
        Message::tool_result("call_1", "r".repeat(100)),
        Message::user("u".repeat(200)),
    ]);

    let outcome = buffer.add_message(Message::user("v".repeat(200)));
    let removed = outcome.removed();
    assert_eq!(removed.len(), 1);
    assert!(removed[0].text_content().starts_with('u'));
    assert_eq!(buffer.len(), 3);
    assert_eq!(buffer.total_tokens(), 400);
    assert_pairs_intact(buffer.messages());
}

#[test]
fn one_batch_per_trigger() {
    let mut buffer = buffer(1000, 0.25);
    let mut triggers = 0;
    for i in 0..11 {
        let outcome = buffer.add_message(Message::user(format!("{}", i % 10).repeat(100)));
        if let Some(report) = outcome.eviction {
            triggers += 1;
            assert_eq!(report.freed_tokens, 400);
            assert_eq!(report.sweeps, 1);
        }
    }
    assert_eq!(triggers, 1);
    assert_eq!(buffer.stats().total_tokens, 700);
    assert_eq!(buffer.eviction_count(), 1);
}

#[test]
fn oversize_newest_message_is_retained() {
    let mut buffer = buffer(1000, 0.25);
    buffer.add_messages([Message::system("rules"), Message::user("small")]);

    let outcome = buffer.add_message(Message::user("x".repeat(5000)));
    let report = outcome.eviction.expect("over budget");
    assert_eq!(report.removed.len(), 2);
    assert!(report.over_budget());

    let stats = buffer.stats();
    assert_eq!(stats.message_count, 1);
    assert!(stats.is_at_capacity);
    assert_eq!(stats.remaining_tokens, 0);
    assert_eq!(stats, buffer.stats());
}

#[test]
fn anthropic_blocks_are_paired() {
    let mut buffer = buffer(300, 0.1);
    buffer.add_messages([
        Message::assistant_blocks(vec![ContentBlock::ToolUse {
            id: "toolu_1".into(),
            name: "ls".into(),
            input: serde_json::json!({}),
        }]),
        Message::user_blocks(vec![
            ContentBlock::ToolResult {
                tool_use_id: "toolu_1".into(),
                content: serde_json::json!("file.txt"),
            },
            ContentBlock::Text {
                text: "t".repeat(150),
            },
        ]),
        Message::user("u".repeat(100)),
        Message::assistant_blocks(vec![ContentBlock::ToolUse {
            id: "toolu_2".into(),
            name: "ls".into(),
            input: serde_json::json!({}),
        }]),
        Message::user_blocks(vec![ContentBlock::ToolResult {
            tool_use_id: "toolu_2".into(),
            content: serde_json::json!("x"),
        }]),
    ]);
    assert_eq!(buffer.total_tokens(), 250);

    let outcome = buffer.add_message(Message::user("n".repeat(100)));
    // Overshoot 50 + batch 30: the settled toolu_1 unit (150) goes as a whole
    // before the user turn behind it.
    let removed = outcome.removed();
    assert_eq!(removed.len(), 2);
    assert!(removed[0].content_blocks().iter().any(|b| matches!(b, ContentBlock::ToolUse { .. })));
    assert_pairs_intact(buffer.messages());
}

#[test]
fn randomized_conversations_keep_pairs_and_budget() {
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for _ in 0..50 {
        let max_tokens = rng.gen_range(200..2000);
        let fraction = rng.gen_range(0.0..0.5);
        let mut buffer = ContextBuffer::new(
            BufferConfig::new(max_tokens).with_batch_remove_fraction(fraction),
        )
        .with_counter(FnCounter::new(|m: &Message| 10 + length_cost(m)));
        buffer.add_message(Message::system("rules"));

        let mut next_id = 0;
        let mut issued = HashSet::new();
        for _ in 0..60 {
            let turn = match rng.gen_range(0..6) {
                0 => vec![Message::user("u".repeat(rng.gen_range(1..400)))],
                1 => vec![Message::assistant_text("a".repeat(rng.gen_range(1..400)))],
                2 => {
                    let calls: Vec<ToolCall> = (0..rng.gen_range(1..3))
                        .map(|_| {
                            next_id += 1;
                            let id = format!("call_{next_id}");
                            issued.insert(id.clone());
                            ToolCall::function(id, "grep", "a".repeat(rng.gen_range(1..200)))
                        })
                        .collect();
                    let mut turn: Vec<Message> = calls
                        .iter()
                        .map(|c| Message::tool_result(c.id.clone(), "r".repeat(rng.gen_range(1..300))))
                        .collect();
                    turn.insert(0, Message::assistant_tool_calls(calls));
                    turn
                }
                3 => {
                    next_id += 1;
                    let id = format!("toolu_{next_id}");
                    issued.insert(id.clone());
                    vec![
                        Message::assistant_blocks(vec![ContentBlock::ToolUse {
                            id: id.clone(),
                            name: "ls".into(),
                            input: serde_json::json!({}),
                        }]),
                        Message::user_blocks(vec![ContentBlock::ToolResult {
                            tool_use_id: id,
                            content: serde_json::json!("ok"),
                        }]),
                    ]
                }
                4 => vec![Message::tool_result("ghost", "orphan")],
                _ => vec![Message::user("u".repeat(rng.gen_range(max_tokens..max_tokens * 2)))],
            };
            buffer.add_messages(turn);

            let messages = buffer.messages();
            let known: Vec<Message> = messages
                .iter()
                .filter(|m| result_ids(m).iter().all(|id| issued.contains(*id)))
                .cloned()
                .collect();
            assert_pairs_intact(&known);

            let stats = buffer.stats();
            if stats.total_tokens > stats.max_tokens {
                let floor = ToolSequenceIndex::build(messages).unit_containing(messages.len() - 1);
                assert_eq!(floor.len(), messages.len(), "evictable messages left over budget");
            }
            assert_eq!(stats, buffer.stats());
        }
    }
}
