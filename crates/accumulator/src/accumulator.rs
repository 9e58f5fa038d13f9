//! Producer-facing accumulator handle.

use std::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::{
    event::Event, AccumulatorBuilder, AccumulatorError, AccumulatorResult, AccumulatorStatus,
    BatchFlusher, Context, ExpiryStage,
};

/// Handle to submit items to a running flush engine.
///
/// Items are delivered to the flusher in submission order, in batches of at
/// most `flush_size`, whenever a batch fills up or `flush_interval` passes
/// with a non-empty batch. Share it between producers behind an `Arc`.
pub struct Accumulator<T> {
    tx: mpsc::Sender<Event<T>>,
    shutdown: CancellationToken,
    done_rx: Mutex<Option<oneshot::Receiver<()>>>,
    closed: AtomicBool,
    status_rx: watch::Receiver<AccumulatorStatus>,
    flush_size: usize,
    flush_interval: Duration,
}

impl<T> Accumulator<T>
where
    T: Send + Sync + 'static,
{
    /// Launches an accumulator on the current tokio runtime.
    ///
    /// Zero `flush_size` or `flush_interval` fall back to the defaults, and
    /// `flush_size` is capped at [`MAX_FLUSH_SIZE`](crate::MAX_FLUSH_SIZE).
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn new<F>(flush_size: usize, flush_interval: Duration, flusher: F) -> Self
    where
        F: BatchFlusher<T>,
    {
        AccumulatorBuilder::new()
            .with_flush_size(flush_size)
            .with_flush_interval(flush_interval)
            .with_flusher(flusher)
            .launch()
    }
}

impl<T> Accumulator<T> {
    pub(crate) fn from_parts(
        tx: mpsc::Sender<Event<T>>,
        shutdown: CancellationToken,
        done_rx: oneshot::Receiver<()>,
        status_rx: watch::Receiver<AccumulatorStatus>,
        flush_size: usize,
        flush_interval: Duration,
    ) -> Self {
        Self {
            tx,
            shutdown,
            done_rx: Mutex::new(Some(done_rx)),
            closed: AtomicBool::new(false),
            status_rx,
            flush_size,
            flush_interval,
        }
    }

    /// Submits an item without waiting for it to be flushed.
    ///
    /// Suspends only while the submission channel is full. Flush failures are
    /// never reported to fire-and-forget submitters.
    pub async fn add_async(&self, ctx: &Context, item: T) -> AccumulatorResult<()> {
        self.precheck(ctx)?;
        self.enqueue(ctx, Event::detached(item)).await
    }

    /// Submits an item and waits until the batch holding it was flushed.
    ///
    /// Returns the flusher's outcome for that batch. If `ctx` expires first the
    /// item stays queued and is still flushed; only the wait is abandoned.
    pub async fn add_sync(&self, ctx: &Context, item: T) -> AccumulatorResult<()> {
        self.precheck(ctx)?;

        let (ev, done) = Event::with_completion(item);
        self.enqueue(ctx, ev).await?;

        tokio::select! {
            biased;

            res = done => match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(AccumulatorError::FlushFailed(e)),
                Err(_) => Err(AccumulatorError::EngineExited),
            },

            reason = ctx.done() => {
                Err(AccumulatorError::expired(ExpiryStage::AwaitingFlush, reason))
            }
        }
    }

    /// Stops accepting items and waits until everything already accepted was
    /// flushed.
    ///
    /// Only the first call does anything; later calls return immediately.
    pub async fn stop(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        self.shutdown.cancel();

        let done_rx = self.done_rx.lock().take();
        if let Some(done_rx) = done_rx {
            if done_rx.await.is_err() {
                warn!("flush engine exited without signalling shutdown");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of items queued for the flush engine but not yet picked up.
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Latest status published by the flush engine.
    pub fn status(&self) -> AccumulatorStatus {
        self.status_rx.borrow().clone()
    }

    /// Returns a receiver that sees every status update.
    pub fn status_watcher(&self) -> watch::Receiver<AccumulatorStatus> {
        self.status_rx.clone()
    }

    pub fn flush_size(&self) -> usize {
        self.flush_size
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    fn precheck(&self, ctx: &Context) -> AccumulatorResult<()> {
        if self.is_closed() {
            return Err(AccumulatorError::SendToClosed);
        }

        if let Some(reason) = ctx.err() {
            return Err(AccumulatorError::expired(ExpiryStage::BeforeEnqueue, reason));
        }

        Ok(())
    }

    async fn enqueue(&self, ctx: &Context, ev: Event<T>) -> AccumulatorResult<()> {
        tokio::select! {
            biased;

            res = self.tx.send(ev) => res.map_err(|_| AccumulatorError::SendToClosed),

            reason = ctx.done() => {
                Err(AccumulatorError::expired(ExpiryStage::Enqueue, reason))
            }
        }
    }
}

impl<T> fmt::Debug for Accumulator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accumulator")
            .field("flush_size", &self.flush_size)
            .field("flush_interval", &self.flush_interval)
            .field("closed", &self.is_closed())
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex as StdMutex};

    use anyhow::anyhow;
    use async_trait::async_trait;
    use tokio::{runtime::Runtime, sync::Semaphore, time};

    use super::*;
    use crate::{AccumulatorConfig, EnginePhase, ExpiryReason, MAX_FLUSH_SIZE};

    type Seen = Arc<StdMutex<Vec<Vec<u32>>>>;

    /// Records every batch; fails any batch containing 13.
    fn recorder() -> (impl BatchFlusher<u32>, Seen) {
        let seen: Seen = Arc::default();
        let seen2 = seen.clone();
        let flusher = move |batch: &[u32]| {
            seen2.lock().unwrap().push(batch.to_vec());
            if batch.contains(&13) {
                return Err(anyhow!("unlucky batch"));
            }
            Ok(())
        };
        (flusher, seen)
    }

    /// Blocks every flush until a permit is released.
    struct GatedFlusher {
        gate: Arc<Semaphore>,
        seen: Seen,
    }

    #[async_trait]
    impl BatchFlusher<u32> for GatedFlusher {
        async fn flush(&self, batch: &[u32]) -> anyhow::Result<()> {
            self.gate.acquire().await?.forget();
            self.seen.lock().unwrap().push(batch.to_vec());
            Ok(())
        }
    }

    async fn wait_for_flushes(acc: &Accumulator<u32>, n: u64) {
        let mut watcher = acc.status_watcher();
        time::timeout(
            Duration::from_secs(5),
            watcher.wait_for(|s| s.flushes() >= n),
        )
        .await
        .expect("timed out waiting for flush")
        .expect("status channel closed");
    }

    #[tokio::test]
    async fn test_size_flush_then_drain_on_stop() {
        let (flusher, seen) = recorder();
        let acc = Accumulator::new(3, Duration::from_secs(3600), flusher);
        let ctx = Context::background();

        for i in 1..=3 {
            acc.add_async(&ctx, i).await.unwrap();
        }
        wait_for_flushes(&acc, 1).await;
        assert_eq!(*seen.lock().unwrap(), vec![vec![1, 2, 3]]);

        acc.add_async(&ctx, 4).await.unwrap();
        acc.stop().await;

        // Stop only returns once the drain flush is done.
        assert_eq!(*seen.lock().unwrap(), vec![vec![1, 2, 3], vec![4]]);
        assert_eq!(acc.status().phase(), EnginePhase::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_ticks_never_flush() {
        let (flusher, seen) = recorder();
        let acc = Accumulator::new(0, Duration::from_millis(10), flusher);
        assert_eq!(acc.flush_size(), 1000);

        time::sleep(Duration::from_millis(100)).await;
        acc.stop().await;

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(acc.status().flushes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_flushes_partial_batch() {
        let (flusher, seen) = recorder();
        let acc = Accumulator::new(100, Duration::from_millis(50), flusher);
        let ctx = Context::background();

        acc.add_async(&ctx, 7).await.unwrap();
        acc.add_async(&ctx, 8).await.unwrap();
        wait_for_flushes(&acc, 1).await;

        assert_eq!(*seen.lock().unwrap(), vec![vec![7, 8]]);
        assert!(!acc.is_closed());
        acc.stop().await;
        assert_eq!(acc.status().flushes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_flush_restarts_interval() {
        let (flusher, seen) = recorder();
        let acc = Accumulator::new(3, Duration::from_millis(100), flusher);
        let ctx = Context::background();
        let start = time::Instant::now();

        time::sleep(Duration::from_millis(60)).await;
        for i in 1..=3 {
            acc.add_async(&ctx, i).await.unwrap();
        }
        wait_for_flushes(&acc, 1).await;
        acc.add_async(&ctx, 4).await.unwrap();

        // The tick originally due at 100ms was pushed to 160ms by the size flush.
        time::sleep_until(start + Duration::from_millis(150)).await;
        assert_eq!(*seen.lock().unwrap(), vec![vec![1, 2, 3]]);

        wait_for_flushes(&acc, 2).await;
        assert!(start.elapsed() >= Duration::from_millis(160));
        assert_eq!(*seen.lock().unwrap(), vec![vec![1, 2, 3], vec![4]]);
        acc.stop().await;
    }

    #[test]
    fn test_launch_from_toml_config_on_handle() {
        let cfg: AccumulatorConfig =
            toml::from_str("flush_size = 2\nname = \"from-toml\"").unwrap();
        let rt = Runtime::new().unwrap();
        let (flusher, seen) = recorder();

        let acc = AccumulatorBuilder::<u32>::new()
            .with_config(cfg)
            .with_flusher(flusher)
            .launch_on(rt.handle());
        assert_eq!(acc.flush_size(), 2);
        assert_eq!(acc.flush_interval(), Duration::from_millis(250));

        rt.block_on(async {
            let ctx = Context::background();
            let (a, b) = tokio::join!(acc.add_sync(&ctx, 1), acc.add_sync(&ctx, 2));
            a.unwrap();
            b.unwrap();
            acc.stop().await;
        });

        assert_eq!(*seen.lock().unwrap(), vec![vec![1, 2]]);
        assert_eq!(acc.status().flushes(), 1);
    }

    #[tokio::test]
    async fn test_oversized_flush_size_launches_clamped() {
        let acc = AccumulatorBuilder::<u32>::new()
            .with_flush_size(usize::MAX)
            .launch();
        assert_eq!(acc.flush_size(), MAX_FLUSH_SIZE);

        acc.add_sync(&Context::background(), 1).await.unwrap();
        acc.stop().await;
        assert_eq!(acc.status().items_flushed(), 1);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_closes() {
        let (flusher, seen) = recorder();
        let acc = Accumulator::new(10, Duration::from_secs(3600), flusher);
        let ctx = Context::background();

        acc.add_async(&ctx, 1).await.unwrap();
        acc.stop().await;
        acc.stop().await;

        assert!(acc.is_closed());
        assert_eq!(*seen.lock().unwrap(), vec![vec![1]]);

        let err = acc.add_async(&ctx, 2).await.unwrap_err();
        assert!(matches!(err, AccumulatorError::SendToClosed));
        let err = acc.add_sync(&ctx, 3).await.unwrap_err();
        assert!(matches!(err, AccumulatorError::SendToClosed));

        assert_eq!(*seen.lock().unwrap(), vec![vec![1]]);
    }

    #[tokio::test]
    async fn test_add_sync_reports_flush_outcome() {
        let (flusher, _seen) = recorder();
        let acc = Accumulator::new(1, Duration::from_secs(3600), flusher);
        let ctx = Context::background();

        acc.add_sync(&ctx, 1).await.unwrap();

        let err = acc.add_sync(&ctx, 13).await.unwrap_err();
        match err {
            AccumulatorError::FlushFailed(e) => assert_eq!(e.to_string(), "unlucky batch"),
            other => panic!("unexpected error: {other}"),
        }

        // Async submitters never see the failure, and the engine keeps going.
        acc.add_async(&ctx, 13).await.unwrap();
        acc.add_sync(&ctx, 2).await.unwrap();

        acc.stop().await;
        let status = acc.status();
        assert_eq!(status.flushes(), 4);
        assert_eq!(status.failed_flushes(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_sync_cancelled_while_waiting() {
        let (flusher, seen) = recorder();
        let acc = Accumulator::new(1000, Duration::from_secs(3600), flusher);

        let ctx = Context::with_timeout(Duration::from_millis(20));
        let err = acc.add_sync(&ctx, 5).await.unwrap_err();
        assert!(matches!(
            err,
            AccumulatorError::ContextExpired {
                stage: ExpiryStage::AwaitingFlush,
                reason: ExpiryReason::DeadlineExceeded,
            }
        ));

        // The abandoned slot must not stall the engine.
        acc.add_async(&Context::background(), 6).await.unwrap();
        acc.stop().await;
        assert_eq!(*seen.lock().unwrap(), vec![vec![5, 6]]);
    }

    #[tokio::test]
    async fn test_expired_context_rejected_before_enqueue() {
        let (flusher, seen) = recorder();
        let acc = Accumulator::new(1, Duration::from_secs(3600), flusher);

        let token = CancellationToken::new();
        token.cancel();
        let ctx = Context::with_cancel(token);

        for res in [acc.add_async(&ctx, 1).await, acc.add_sync(&ctx, 2).await] {
            assert!(matches!(
                res,
                Err(AccumulatorError::ContextExpired {
                    stage: ExpiryStage::BeforeEnqueue,
                    reason: ExpiryReason::Cancelled,
                })
            ));
        }

        acc.stop().await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backpressure_enqueue_cancellable() {
        let gate = Arc::new(Semaphore::new(0));
        let seen: Seen = Arc::default();
        let flusher = GatedFlusher {
            gate: gate.clone(),
            seen: seen.clone(),
        };
        let acc = Accumulator::new(1, Duration::from_secs(3600), flusher);
        let bg = Context::background();

        // First item is taken by the engine and blocks in the flusher, the
        // second fills the channel.
        acc.add_async(&bg, 1).await.unwrap();
        acc.add_async(&bg, 2).await.unwrap();
        assert_eq!(acc.pending(), 1);

        let ctx = Context::with_timeout(Duration::from_millis(20));
        let err = acc.add_async(&ctx, 3).await.unwrap_err();
        assert!(matches!(
            err,
            AccumulatorError::ContextExpired {
                stage: ExpiryStage::Enqueue,
                ..
            }
        ));

        gate.add_permits(10);
        acc.stop().await;
        assert_eq!(*seen.lock().unwrap(), vec![vec![1], vec![2]]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sync_producers() {
        let (flusher, seen) = recorder();
        let acc = Arc::new(Accumulator::new(16, Duration::from_millis(5), flusher));

        let mut tasks = Vec::new();
        for p in 0..8u32 {
            let acc = acc.clone();
            tasks.push(tokio::spawn(async move {
                let ctx = Context::background();
                for i in 0..50u32 {
                    // Offset keeps 13 out of the stream so no batch fails.
                    let item = 100 + p * 1000 + i;
                    acc.add_sync(&ctx, item).await.unwrap();
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        acc.stop().await;

        let batches = seen.lock().unwrap();
        assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= 16));
        assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), 400);

        // Each producer's items stay in submission order.
        for p in 0..8u32 {
            let mine: Vec<u32> = batches
                .iter()
                .flatten()
                .copied()
                .filter(|v| (*v - 100) / 1000 == p)
                .collect();
            let expected: Vec<u32> = (0..50).map(|i| 100 + p * 1000 + i).collect();
            assert_eq!(mine, expected);
        }
    }

    #[tokio::test]
    async fn test_drop_without_stop_still_flushes() {
        let (flusher, seen) = recorder();
        let acc = Accumulator::new(100, Duration::from_secs(3600), flusher);
        let mut watcher = acc.status_watcher();

        acc.add_async(&Context::background(), 9).await.unwrap();
        drop(acc);

        time::timeout(
            Duration::from_secs(5),
            watcher.wait_for(|s| s.phase() == EnginePhase::Stopped),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![vec![9]]);
    }

    #[tokio::test]
    async fn test_noop_flusher_default() {
        let acc = AccumulatorBuilder::<u32>::new()
            .with_flush_size(2)
            .with_flush_interval(Duration::from_millis(10))
            .with_name("noop")
            .launch();
        let ctx = Context::background();

        acc.add_sync(&ctx, 1).await.unwrap();
        acc.add_sync(&ctx, 2).await.unwrap();
        acc.stop().await;
        assert_eq!(acc.status().items_flushed(), 2);
    }

    proptest::proptest! {
        #[test]
        fn test_order_and_count_preserved(
            items in proptest::collection::vec(0u32..1000, 0..200),
            flush_size in 1usize..16,
        ) {
            let rt = Runtime::new().unwrap();
            rt.block_on(async {
                let seen: Seen = Arc::default();
                let seen2 = seen.clone();
                let flusher = move |batch: &[u32]| -> anyhow::Result<()> {
                    seen2.lock().unwrap().push(batch.to_vec());
                    Ok(())
                };
                let acc = Accumulator::new(flush_size, Duration::from_secs(3600), flusher);
                let ctx = Context::background();

                for &item in &items {
                    acc.add_async(&ctx, item).await.unwrap();
                }
                acc.stop().await;

                let batches = seen.lock().unwrap();
                assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= flush_size));
                let flat: Vec<u32> = batches.iter().flatten().copied().collect();
                assert_eq!(flat, items);
            });
        }
    }
}
