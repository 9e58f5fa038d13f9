//! Accumulator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of items per batch.
pub const DEFAULT_FLUSH_SIZE: usize = 1000;

/// Largest accepted batch size. Larger values are clamped to it.
pub const MAX_FLUSH_SIZE: usize = 1 << 20;

/// Default flush interval in millis.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 250;

/// Default name used in log spans.
const DEFAULT_NAME: &str = "accumulator";

fn default_flush_size() -> usize {
    DEFAULT_FLUSH_SIZE
}

fn default_flush_interval_ms() -> u64 {
    DEFAULT_FLUSH_INTERVAL_MS
}

fn default_name() -> String {
    DEFAULT_NAME.to_owned()
}

/// Batch size and timing for an accumulator.
///
/// Zero values are treated as unset and fall back to the defaults. The batch
/// size is capped at [`MAX_FLUSH_SIZE`].
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct AccumulatorConfig {
    /// Items per batch. Also the capacity of the submission channel.
    #[serde(default = "default_flush_size")]
    flush_size: usize,

    /// Max time between flushes of a non-empty batch, in millis.
    #[serde(default = "default_flush_interval_ms")]
    flush_interval_ms: u64,

    /// Label for the engine's tracing span.
    #[serde(default = "default_name")]
    name: String,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            flush_size: DEFAULT_FLUSH_SIZE,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            name: default_name(),
        }
    }
}

impl AccumulatorConfig {
    pub fn new(flush_size: usize, flush_interval: Duration) -> Self {
        Self::default()
            .with_flush_size(flush_size)
            .with_flush_interval(flush_interval)
    }

    pub fn with_flush_size(mut self, flush_size: usize) -> Self {
        self.flush_size = flush_size;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        let ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        // Round a non-zero sub-millisecond interval up instead of treating it as unset.
        self.flush_interval_ms = if ms == 0 && !interval.is_zero() { 1 } else { ms };
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Batch size, with the default substituted for zero and capped at
    /// [`MAX_FLUSH_SIZE`].
    pub fn flush_size(&self) -> usize {
        match self.flush_size {
            0 => DEFAULT_FLUSH_SIZE,
            n => n.min(MAX_FLUSH_SIZE),
        }
    }

    /// Flush interval, with the default substituted for zero.
    pub fn flush_interval(&self) -> Duration {
        let ms = if self.flush_interval_ms == 0 {
            DEFAULT_FLUSH_INTERVAL_MS
        } else {
            self.flush_interval_ms
        };
        Duration::from_millis(ms)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
