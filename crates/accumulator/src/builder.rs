//! Accumulator builder/launcher.

use std::{fmt, marker::PhantomData, time::Duration};

use tokio::{
    runtime::Handle,
    sync::{mpsc, oneshot, watch},
};
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::{
    engine::FlushEngine, Accumulator, AccumulatorConfig, AccumulatorStatus, BatchFlusher,
    NoopFlusher,
};

/// Collects the configuration and flusher, then launches the flush engine.
pub struct AccumulatorBuilder<T, F = NoopFlusher> {
    config: AccumulatorConfig,
    flusher: F,
    _item: PhantomData<fn(T)>,
}

impl<T> AccumulatorBuilder<T> {
    /// Builder with default config and a flusher that discards batches.
    pub fn new() -> Self {
        Self {
            config: AccumulatorConfig::default(),
            flusher: NoopFlusher,
            _item: PhantomData,
        }
    }
}

impl<T> Default for AccumulatorBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, F> AccumulatorBuilder<T, F> {
    /// Replaces the whole config.
    pub fn with_config(mut self, config: AccumulatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_flush_size(mut self, flush_size: usize) -> Self {
        self.config = self.config.with_flush_size(flush_size);
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.config = self.config.with_flush_interval(interval);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config = self.config.with_name(name);
        self
    }

    /// Sets the consumer of flushed batches.
    pub fn with_flusher<G: BatchFlusher<T>>(self, flusher: G) -> AccumulatorBuilder<T, G> {
        AccumulatorBuilder {
            config: self.config,
            flusher,
            _item: PhantomData,
        }
    }
}

impl<T, F> AccumulatorBuilder<T, F>
where
    T: Send + Sync + 'static,
    F: BatchFlusher<T>,
{
    /// Spawns the flush engine on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn launch(self) -> Accumulator<T> {
        self.launch_on(&Handle::current())
    }

    /// Spawns the flush engine on the given runtime.
    pub fn launch_on(self, handle: &Handle) -> Accumulator<T> {
        let flush_size = self.config.flush_size();
        let flush_interval = self.config.flush_interval();

        let (tx, rx) = mpsc::channel(flush_size);
        let (done_tx, done_rx) = oneshot::channel();
        let (status_tx, status_rx) = watch::channel(AccumulatorStatus::default());
        let shutdown = CancellationToken::new();

        let engine = FlushEngine::new(
            rx,
            self.flusher,
            flush_size,
            flush_interval,
            shutdown.clone(),
            status_tx,
        );

        let span = info_span!("accumulator", name = %self.config.name());
        handle.spawn(engine.run(done_tx).instrument(span));

        Accumulator::from_parts(
            tx,
            shutdown,
            done_rx,
            status_rx,
            flush_size,
            flush_interval,
        )
    }
}

impl<T, F> fmt::Debug for AccumulatorBuilder<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccumulatorBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
