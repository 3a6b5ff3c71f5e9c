//! Configuration types for the [`ContextBuffer`](crate::context::ContextBuffer).
//!
//! Every knob has a default, so the common case is a single call:
//!
//! ```
//! use ctxbuf::config::BufferConfig;
//!
//! let config = BufferConfig::new(8_000).with_batch_remove_fraction(0.25);
//! assert_eq!(config.batch_remove_tokens(), 2_000);
//! ```
//!
//! Optional modules are wrapped in [`Toggle`] and can be switched off with
//! struct update syntax:
//!
//! ```
//! use ctxbuf::config::{BufferConfig, Toggle};
//!
//! let config = BufferConfig {
//!     summaries: Toggle::disabled(),
//!     ..BufferConfig::new(8_000)
//! };
//! assert!(!config.summaries.enabled);
//! ```

// ── Generic toggle ────────────────────────────────────────────────

/// Generic enabled/disabled wrapper for module configurations.
///
/// When `enabled` is `false`, the module is skipped regardless of the inner
/// config values.
#[derive(Debug, Clone)]
pub struct Toggle<T: Default> {
    /// Whether this module is active.
    pub enabled: bool,
    /// Module-specific configuration.
    pub config: T,
}

impl<T: Default> Toggle<T> {
    /// Create a disabled instance with default inner config.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            config: T::default(),
        }
    }

    /// Create an enabled instance with the given inner config.
    pub fn enabled(config: T) -> Self {
        Self {
            enabled: true,
            config,
        }
    }
}

impl<T: Default> Default for Toggle<T> {
    fn default() -> Self {
        Self {
            enabled: true,
            config: T::default(),
        }
    }
}

// ── Summary config ────────────────────────────────────────────────

/// Configuration for the evicted-span summary log.
#[derive(Debug, Clone)]
pub struct SummaryConfig {
    /// Number of most recent summaries kept and rendered. Default: `6`.
    pub keep_last: usize,
    /// Per-message character cap when formatting an evicted span for the
    /// summarization request. Default: `200`.
    pub max_chars_per_message: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            keep_last: 6,
            max_chars_per_message: 200,
        }
    }
}

/// Summary module configuration.
pub type BufferSummaryConfig = Toggle<SummaryConfig>;

// ── Buffer config ─────────────────────────────────────────────────

/// Default token budget.
pub const DEFAULT_MAX_TOKENS: usize = 4096;

/// Default fraction of `max_tokens` freed per eviction trigger.
pub const DEFAULT_BATCH_REMOVE_FRACTION: f64 = 0.30;

/// Default length (in characters) at or below which a plain assistant reply
/// counts as low-information.
pub const DEFAULT_LOW_INFORMATION_CHARS: usize = 200;

/// Configuration for a [`ContextBuffer`](crate::context::ContextBuffer).
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Hard token budget. Default: `4096`.
    pub max_tokens: usize,
    /// Fraction of `max_tokens` to free, on top of the overshoot, each time
    /// eviction triggers. Default: `0.30`.
    pub batch_remove_fraction: f64,
    /// Plain assistant replies with at most this many characters are evicted
    /// before anything else. Default: `200`.
    pub low_information_chars: usize,
    /// Evicted-span summary log. Enabled by default.
    pub summaries: BufferSummaryConfig,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            batch_remove_fraction: DEFAULT_BATCH_REMOVE_FRACTION,
            low_information_chars: DEFAULT_LOW_INFORMATION_CHARS,
            summaries: Toggle::default(),
        }
    }
}

impl BufferConfig {
    /// Create a config with the given token budget and defaults for the rest.
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            ..Default::default()
        }
    }

    /// Override the token budget.
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the batch fraction. Values are clamped to `0.0..=1.0`; a
    /// non-finite value falls back to the default.
    pub fn with_batch_remove_fraction(mut self, fraction: f64) -> Self {
        self.batch_remove_fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            DEFAULT_BATCH_REMOVE_FRACTION
        };
        self
    }

    /// Set the low-information threshold for plain assistant replies.
    pub fn with_low_information_chars(mut self, chars: usize) -> Self {
        self.low_information_chars = chars;
        self
    }

    /// Set the summary module configuration.
    pub fn with_summaries(mut self, summaries: SummaryConfig) -> Self {
        self.summaries = Toggle::enabled(summaries);
        self
    }

    /// Disable the summary module.
    pub fn without_summaries(mut self) -> Self {
        self.summaries = Toggle::disabled();
        self
    }

    /// Tokens to free per trigger, excluding the overshoot above the budget.
    pub fn batch_remove_tokens(&self) -> usize {
        (self.max_tokens as f64 * self.batch_remove_fraction).ceil() as usize
    }

    /// Check values that were set directly on the struct (e.g. from CLI flags).
    pub fn validate(&self) -> Result<(), String> {
        if self.max_tokens == 0 {
            return Err("max_tokens must be greater than zero".to_string());
        }
        if !self.batch_remove_fraction.is_finite()
            || !(0.0..=1.0).contains(&self.batch_remove_fraction)
        {
            return Err(format!(
                "batch_remove_fraction must be between 0.0 and 1.0, got {}",
                self.batch_remove_fraction
            ));
        }
        if self.summaries.enabled && self.summaries.config.keep_last == 0 {
            return Err("summaries.keep_last must be at least 1 when summaries are enabled".into());
        }
        Ok(())
    }
}
