//! Reusable buffer pool.
//!
//! Buffers are plain `Vec`s pre-sized to the pool's size class. A borrow hands
//! out a retained buffer when one is available and allocates a fresh one
//! otherwise, so a miss is never an error.

use std::{
    fmt, mem,
    ops::{Deref, DerefMut},
};

use parking_lot::Mutex;

/// Default number of idle buffers a pool keeps around.
pub const DEFAULT_MAX_RETAINED: usize = 4;

/// Free list of `Vec<T>` buffers sharing one capacity class.
pub struct BufferPool<T> {
    /// Capacity every buffer handed out is guaranteed to have.
    size_class: usize,
    max_retained: usize,
    free: Mutex<Vec<Vec<T>>>,
}

impl<T> BufferPool<T> {
    /// Creates a pool handing out buffers with at least `size_class` capacity.
    pub fn new(size_class: usize) -> Self {
        Self::with_max_retained(size_class, DEFAULT_MAX_RETAINED)
    }

    /// Creates a pool that keeps at most `max_retained` idle buffers.
    pub fn with_max_retained(size_class: usize, max_retained: usize) -> Self {
        Self {
            size_class,
            max_retained,
            free: Mutex::new(Vec::with_capacity(max_retained)),
        }
    }

    /// Number of idle buffers currently retained.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    /// Borrows an empty buffer.
    ///
    /// The caller owns the buffer exclusively until it is passed back with
    /// [`Self::put`].
    pub fn take(&self) -> Vec<T> {
        self.free
            .lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.size_class))
    }

    /// Returns a buffer to the pool, clearing it first.
    ///
    /// Buffers that shrank below the size class or that would exceed the
    /// retention bound are dropped.
    pub fn put(&self, mut buf: Vec<T>) {
        buf.clear();
        if buf.capacity() < self.size_class {
            return;
        }

        let mut free = self.free.lock();
        if free.len() < self.max_retained {
            free.push(buf);
        }
    }

    /// Borrows a buffer wrapped in a guard that returns it on drop.
    pub fn take_guarded(&self) -> PooledVec<'_, T> {
        PooledVec {
            buf: self.take(),
            pool: self,
        }
    }
}

impl<T> fmt::Debug for BufferPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("size_class", &self.size_class)
            .field("max_retained", &self.max_retained)
            .field("idle", &self.idle())
            .finish()
    }
}

/// Buffer borrowed from a [`BufferPool`], returned to it when dropped.
pub struct PooledVec<'p, T> {
    buf: Vec<T>,
    pool: &'p BufferPool<T>,
}

impl<T> Deref for PooledVec<'_, T> {
    type Target = Vec<T>;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl<T> DerefMut for PooledVec<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl<T: fmt::Debug> fmt::Debug for PooledVec<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.buf.iter()).finish()
    }
}

impl<T> Drop for PooledVec<'_, T> {
    fn drop(&mut self) {
        let buf = mem::take(&mut self.buf);
        self.pool.put(buf);
    }
}
