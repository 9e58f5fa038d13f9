//! Channel-backed event storage with snapshot drains.
//!
//! An alternative to the engine's channel+timer pairing for callers that want
//! to pull batches themselves: `put` always queues (suspending while full) and
//! `get` drains whatever was queued at the moment of the call.

use std::fmt;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::pool::{BufferPool, PooledVec};

/// Bounded buffer of pending items.
pub struct EventStorage<T> {
    tx: mpsc::Sender<T>,
    rx: Mutex<mpsc::Receiver<T>>,
    pool: BufferPool<T>,
}

impl<T> EventStorage<T> {
    /// Creates a storage holding at most `size` items. A zero size is bumped
    /// to one.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (tx, rx) = mpsc::channel(size);
        Self {
            tx,
            rx: Mutex::new(rx),
            pool: BufferPool::new(size),
        }
    }

    /// Queues an item, suspending while the storage is full.
    ///
    /// Returns whether there is room left afterwards. This is a hint for
    /// callers to drain, not a rejection: the item is always stored.
    pub async fn put(&self, item: T) -> bool {
        // We own the receiver, so the channel can't be closed under us.
        if self.tx.send(item).await.is_err() {
            return false;
        }

        self.tx.capacity() > 0
    }

    /// Drains the items queued as of this call into a pooled buffer.
    ///
    /// Items queued while the drain runs are left for the next call. The
    /// buffer goes back to the pool when the returned guard drops.
    pub fn get(&self) -> PooledVec<'_, T> {
        let mut out = self.pool.take_guarded();
        let mut rx = self.rx.lock();

        let n = self.len();
        for _ in 0..n {
            match rx.try_recv() {
                Ok(item) => out.push(item),
                Err(_) => break,
            }
        }

        out
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

impl<T> fmt::Debug for EventStorage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStorage")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
