//! Replay a recorded conversation through a [`ContextBuffer`].
//!
//! The input is JSON Lines: each non-empty line is either one message or a
//! JSON array of messages appended together as one turn (for example an
//! assistant tool-call message followed by its results).
//!
//! ```
//! use ctxbuf::prelude::*;
//! use ctxbuf::replay::{parse_turns, replay};
//!
//! let input = r#"
//! {"role":"user","content":"What is the weather in Tokyo?"}
//! [{"role":"assistant","tool_calls":[{"id":"c1","type":"function","function":{"name":"check_weather","arguments":"{}"}}]},{"role":"tool","tool_call_id":"c1","content":"25C"}]
//! "#;
//! let turns = parse_turns(input).unwrap();
//! assert_eq!(turns.len(), 2);
//!
//! let mut buffer = ContextBuffer::new(BufferConfig::new(4_000));
//! let summary = replay(&mut buffer, turns);
//! assert_eq!(summary.messages_added, 3);
//! assert_eq!(summary.evictions, 0);
//! ```

use crate::Message;
use crate::context::{ContextBuffer, ContextStats};
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Parse JSON Lines into turns. Blank lines and empty arrays are skipped.
pub fn parse_turns(input: &str) -> Result<Vec<Vec<Message>>, String> {
    let mut turns = Vec::new();
    for (n, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: serde_json::Value =
            serde_json::from_str(line).map_err(|e| format!("line {}: invalid JSON: {e}", n + 1))?;
        let turn = if value.is_array() {
            serde_json::from_value::<Vec<Message>>(value)
        } else {
            serde_json::from_value::<Message>(value).map(|m| vec![m])
        }
        .map_err(|e| format!("line {}: invalid message: {e}", n + 1))?;
        if !turn.is_empty() {
            turns.push(turn);
        }
    }
    Ok(turns)
}

/// Read and parse a JSON Lines conversation file.
pub fn load_turns(path: impl AsRef<Path>) -> Result<Vec<Vec<Message>>, String> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read conversation file '{}': {e}", path.display()))?;
    parse_turns(&content).map_err(|e| format!("{}: {e}", path.display()))
}

/// What happened on one turn of a replay.
#[derive(Debug, Clone, Serialize)]
pub struct TurnRecord {
    /// 1-based turn number.
    pub turn: usize,
    pub added: usize,
    pub removed: usize,
    pub freed_tokens: usize,
    pub total_tokens: usize,
}

/// Outcome of [`replay`].
#[derive(Debug, Clone, Serialize)]
pub struct ReplaySummary {
    pub turns: Vec<TurnRecord>,
    pub messages_added: usize,
    /// Turns that removed at least one message.
    pub evictions: usize,
    pub messages_evicted: usize,
    pub final_stats: ContextStats,
}

/// Feed each turn to [`ContextBuffer::add_messages`] in order.
pub fn replay(
    buffer: &mut ContextBuffer,
    turns: impl IntoIterator<Item = Vec<Message>>,
) -> ReplaySummary {
    let mut records = Vec::new();
    let mut messages_added = 0;
    let mut evictions = 0;
    let mut messages_evicted = 0;

    for (i, turn) in turns.into_iter().enumerate() {
        let outcome = buffer.add_messages(turn);
        let removed = outcome.removed().len();
        let freed_tokens = outcome.eviction.as_ref().map_or(0, |e| e.freed_tokens);
        if let Some(report) = outcome.eviction.as_ref().filter(|_| outcome.truncated()) {
            info!(turn = i + 1, "{}", report.to_log_string());
            evictions += 1;
        }
        messages_added += outcome.added;
        messages_evicted += removed;
        records.push(TurnRecord {
            turn: i + 1,
            added: outcome.added,
            removed,
            freed_tokens,
            total_tokens: buffer.total_tokens(),
        });
    }

    ReplaySummary {
        turns: records,
        messages_added,
        evictions,
        messages_evicted,
        final_stats: buffer.stats(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageRole;
    use crate::config::BufferConfig;
    use crate::context::FnCounter;
    use std::io::Write;

    #[test]
    fn parses_single_messages_and_turns() {
        let input = r#"
{"role":"system","content":"rules"}

[{"role":"user","content":"a"},{"role":"assistant","content":"b"}]
[]
"#;
        let turns = parse_turns(input).unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0][0].role, MessageRole::System);
        assert_eq!(turns[1].len(), 2);
    }

    #[test]
    fn reports_line_numbers() {
        let err = parse_turns("{\"role\":\"user\",\"content\":\"ok\"}\nnot json\n").unwrap_err();
        assert!(err.starts_with("line 2"), "{err}");

        let err = parse_turns(r#"{"role":"narrator","content":"x"}"#).unwrap_err();
        assert!(err.contains("line 1: invalid message"), "{err}");
    }

    #[test]
    fn load_turns_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"role":"user","content":"hello"}}"#).unwrap();
        writeln!(file, r#"{{"role":"assistant","content":"hi"}}"#).unwrap();
        let turns = load_turns(file.path()).unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1][0].text_content(), "hi");
    }

    #[test]
    fn load_turns_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_turns(dir.path().join("nope.jsonl")).unwrap_err();
        assert!(err.contains("failed to read conversation file"));
    }

    #[test]
    fn replay_counts_evictions() {
        let mut buffer = ContextBuffer::new(BufferConfig::new(300).with_batch_remove_fraction(0.2))
            .with_counter(FnCounter::new(|m: &Message| m.text_content().len()));
        let turns: Vec<Vec<Message>> = (0..5).map(|_| vec![Message::user("x".repeat(100))]).collect();

        let summary = replay(&mut buffer, turns);
        assert_eq!(summary.messages_added, 5);
        // Turn 4 overshoots by 100; target 160 removes two messages.
        assert_eq!(summary.turns[3].removed, 2);
        assert_eq!(summary.turns[3].freed_tokens, 200);
        assert_eq!(summary.evictions, 1);
        assert_eq!(summary.messages_evicted, 2);
        assert_eq!(summary.final_stats.message_count, 3);
        assert_eq!(summary.final_stats.total_tokens, 300);
    }
}
