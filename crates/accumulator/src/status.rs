//! Flush engine status snapshots.

use serde::Serialize;

/// Lifecycle phase of the flush engine.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnginePhase {
    /// Accepting items, flushing on size or interval.
    #[default]
    Running,

    /// Shutdown requested; working through already queued items.
    Draining,

    /// Final flush done, task exited.
    Stopped,
}

/// Counters published by the flush engine after every flush and phase change.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct AccumulatorStatus {
    phase: EnginePhase,
    flushes: u64,
    failed_flushes: u64,
    items_flushed: u64,
    last_batch_len: usize,
}

impl AccumulatorStatus {
    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    /// Number of flusher invocations so far.
    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    /// Number of flusher invocations that returned an error or panicked.
    pub fn failed_flushes(&self) -> u64 {
        self.failed_flushes
    }

    /// Total payloads handed to the flusher.
    pub fn items_flushed(&self) -> u64 {
        self.items_flushed
    }

    pub fn last_batch_len(&self) -> usize {
        self.last_batch_len
    }

    pub(crate) fn set_phase(&mut self, phase: EnginePhase) {
        self.phase = phase;
    }

    pub(crate) fn record_flush(&mut self, len: usize, ok: bool) {
        self.flushes += 1;
        self.items_flushed += len as u64;
        self.last_batch_len = len;
        if !ok {
            self.failed_flushes += 1;
        }
    }
}
