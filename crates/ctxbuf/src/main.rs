//! Replay a recorded conversation through a token-bounded context buffer and
//! report what was evicted.
//!
//! # Examples
//!
//! ```sh
//! # Replay with the default 4096-token budget
//! ctxbuf --file conversation.jsonl
//!
//! # Tight budget, smaller batches, machine-readable output
//! ctxbuf --file conversation.jsonl --max-tokens 1000 --batch-fraction 0.2 --json
//!
//! # Per-message debug logs on stderr
//! ctxbuf --file conversation.jsonl --verbose
//! ```

use clap::Parser;
use ctxbuf::Message;
use ctxbuf::config::{
    BufferConfig, DEFAULT_BATCH_REMOVE_FRACTION, DEFAULT_LOW_INFORMATION_CHARS, DEFAULT_MAX_TOKENS,
};
use ctxbuf::context::{CharEstimator, ContextBuffer};
use ctxbuf::replay::{ReplaySummary, load_turns, replay};
use serde::Serialize;
use std::process;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Replay a JSONL conversation through a token-bounded context buffer.
///
/// Each non-empty line is one message or a JSON array of messages that
/// arrive together.
#[derive(Parser)]
#[command(name = "ctxbuf")]
struct Cli {
    /// Path to the JSONL conversation
    #[arg(long)]
    file: String,

    // ── Budget ─────────────────────────────────────────────────
    /// Token budget
    #[arg(long, default_value_t = DEFAULT_MAX_TOKENS)]
    max_tokens: usize,

    /// Fraction of the budget freed per eviction, on top of the overshoot
    #[arg(long, default_value_t = DEFAULT_BATCH_REMOVE_FRACTION)]
    batch_fraction: f64,

    /// Plain assistant replies at or under this many characters are evicted first
    #[arg(long, default_value_t = DEFAULT_LOW_INFORMATION_CHARS)]
    low_info_chars: usize,

    /// Characters per token for the estimator (default: 3.5)
    #[arg(long)]
    chars_per_token: Option<f64>,

    // ── Output ─────────────────────────────────────────────────
    /// Print the report and retained messages as JSON
    #[arg(long)]
    json: bool,

    /// Log every append at debug level
    #[arg(long)]
    verbose: bool,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    #[serde(flatten)]
    summary: &'a ReplaySummary,
    messages: &'a [Message],
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "ctxbuf=debug" } else { "ctxbuf=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

fn run(cli: &Cli) -> Result<String, String> {
    let config = BufferConfig {
        max_tokens: cli.max_tokens,
        batch_remove_fraction: cli.batch_fraction,
        low_information_chars: cli.low_info_chars,
        ..Default::default()
    };
    config.validate()?;
    if let Some(ratio) = cli.chars_per_token
        && !(ratio.is_finite() && ratio > 0.0)
    {
        return Err(format!("--chars-per-token must be positive, got {ratio}"));
    }

    let turns = load_turns(&cli.file)?;
    let mut buffer =
        ContextBuffer::new(config).with_counter(CharEstimator::with_calibration(cli.chars_per_token));
    let summary = replay(&mut buffer, turns);

    if cli.json {
        let report = JsonReport {
            summary: &summary,
            messages: buffer.messages(),
        };
        return serde_json::to_string_pretty(&report)
            .map(|s| s + "\n")
            .map_err(|e| format!("failed to serialize report: {e}"));
    }

    let mut out = String::new();
    out.push_str(&format!(
        "replayed {} turns ({} messages), {} evictions removed {} messages\n",
        summary.turns.len(),
        summary.messages_added,
        summary.evictions,
        summary.messages_evicted,
    ));
    out.push_str(&summary.final_stats.to_log_string());
    out.push('\n');
    if summary.final_stats.total_tokens > summary.final_stats.max_tokens {
        out.push_str("warning: newest messages alone exceed the budget\n");
    }
    out.push('\n');
    for msg in buffer.messages() {
        let line = serde_json::to_string(msg)
            .map_err(|e| format!("failed to serialize message: {e}"))?;
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(output) => print!("{output}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
