//! Flush callback trait.

use async_trait::async_trait;

/// Consumer of accumulated batches.
///
/// Called by the flush engine with one non-empty batch at a time, never
/// concurrently for the same accumulator. An error is reported to every
/// synchronous submitter whose item was in the batch; the engine keeps going.
#[async_trait]
pub trait BatchFlusher<T>: Send + Sync + 'static {
    async fn flush(&self, batch: &[T]) -> anyhow::Result<()>;
}

#[async_trait]
impl<T, F> BatchFlusher<T> for F
where
    F: Fn(&[T]) -> anyhow::Result<()> + Send + Sync + 'static,
    T: Send + Sync,
{
    async fn flush(&self, batch: &[T]) -> anyhow::Result<()> {
        self(batch)
    }
}

/// Flusher that accepts every batch and does nothing with it.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopFlusher;

#[async_trait]
impl<T: Send + Sync> BatchFlusher<T> for NoopFlusher {
    async fn flush(&self, _batch: &[T]) -> anyhow::Result<()> {
        Ok(())
    }
}
