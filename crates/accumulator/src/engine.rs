//! Flush engine task.
//!
//! A single task per accumulator owns the in-progress batch. Producers hand
//! events over through the bounded submission channel, so the batch itself is
//! never shared and needs no locking.

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use anyhow::anyhow;
use futures::FutureExt;
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::{
    event::{CompletionSender, Event, FlushOutcome},
    pool::BufferPool,
    AccumulatorStatus, BatchFlusher, EnginePhase,
};

pub(crate) struct FlushEngine<T, F> {
    rx: mpsc::Receiver<Event<T>>,
    flusher: F,
    flush_size: usize,
    flush_interval: Duration,
    shutdown: CancellationToken,

    batch_pool: BufferPool<Event<T>>,
    payload_pool: BufferPool<T>,
    completion_pool: BufferPool<CompletionSender>,

    status: AccumulatorStatus,
    status_tx: watch::Sender<AccumulatorStatus>,
}

impl<T, F> FlushEngine<T, F>
where
    T: Send + Sync + 'static,
    F: BatchFlusher<T>,
{
    pub(crate) fn new(
        rx: mpsc::Receiver<Event<T>>,
        flusher: F,
        flush_size: usize,
        flush_interval: Duration,
        shutdown: CancellationToken,
        status_tx: watch::Sender<AccumulatorStatus>,
    ) -> Self {
        Self {
            rx,
            flusher,
            flush_size,
            flush_interval,
            shutdown,
            batch_pool: BufferPool::new(flush_size),
            payload_pool: BufferPool::new(flush_size),
            completion_pool: BufferPool::new(flush_size),
            status: AccumulatorStatus::default(),
            status_tx,
        }
    }

    /// Runs until shutdown is requested or every sender is gone, then drains
    /// whatever was already accepted and signals `done_tx`.
    pub(crate) async fn run(mut self, done_tx: oneshot::Sender<()>) {
        debug!(
            flush_size = %self.flush_size,
            interval = ?self.flush_interval,
            "flush engine started"
        );

        // First tick fires one interval from now, not immediately.
        let start = Instant::now() + self.flush_interval;
        let mut ticker = time::interval_at(start, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut batch = self.batch_pool.take();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("shutdown requested");
                    break;
                }

                ev = self.rx.recv() => {
                    let Some(ev) = ev else {
                        debug!("all submitters dropped");
                        break;
                    };

                    batch.push(ev);
                    if batch.len() >= self.flush_size {
                        batch = self.flush(batch).await;
                        ticker.reset();
                    }
                }

                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        batch = self.flush(batch).await;
                    }
                }
            }
        }

        self.set_phase(EnginePhase::Draining);

        // Reject new sends but keep what is already queued.
        self.rx.close();
        while let Some(ev) = self.rx.recv().await {
            batch.push(ev);
            if batch.len() >= self.flush_size {
                batch = self.flush(batch).await;
            }
        }

        let batch = self.flush(batch).await;
        self.batch_pool.put(batch);

        self.set_phase(EnginePhase::Stopped);
        debug!(
            flushes = %self.status.flushes(),
            items = %self.status.items_flushed(),
            "flush engine stopped"
        );

        let _ = done_tx.send(());
    }

    /// Flushes `batch` and returns a fresh buffer for the next cycle.
    ///
    /// Empty batches are handed straight back without calling the flusher.
    pub(crate) async fn flush(&mut self, mut batch: Vec<Event<T>>) -> Vec<Event<T>> {
        if batch.is_empty() {
            return batch;
        }

        let mut payloads = self.payload_pool.take();
        let mut completions = self.completion_pool.take();
        for ev in batch.drain(..) {
            payloads.push(ev.payload);
            if let Some(c) = ev.completion {
                completions.push(c);
            }
        }
        self.batch_pool.put(batch);

        let len = payloads.len();
        trace!(%len, waiters = %completions.len(), "flushing batch");

        let outcome = self.invoke_flusher(&payloads).await;
        self.status.record_flush(len, outcome.is_ok());
        let _ = self.status_tx.send(self.status.clone());

        // Slots hold one value, so a caller that gave up never blocks us.
        let mut abandoned = 0;
        for c in completions.drain(..) {
            if c.send(outcome.clone()).is_err() {
                abandoned += 1;
            }
        }
        if abandoned > 0 {
            trace!(%abandoned, "completion receivers already dropped");
        }

        self.payload_pool.put(payloads);
        self.completion_pool.put(completions);

        self.batch_pool.take()
    }

    async fn invoke_flusher(&self, payloads: &[T]) -> FlushOutcome {
        let res = AssertUnwindSafe(self.flusher.flush(payloads))
            .catch_unwind()
            .await;

        match res {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(%e, len = %payloads.len(), "flush failed");
                Err(Arc::new(e))
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                error!(%msg, len = %payloads.len(), "flusher panicked");
                Err(Arc::new(anyhow!("flusher panicked: {msg}")))
            }
        }
    }

    fn set_phase(&mut self, phase: EnginePhase) {
        self.status.set_phase(phase);
        let _ = self.status_tx.send(self.status.clone());
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
