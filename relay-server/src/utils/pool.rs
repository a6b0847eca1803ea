use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;

/// Buffers larger than this are not returned to the pool.
const MAX_POOLED_CAPACITY: usize = 4 * 1024 * 1024;

/// A pool of reusable byte buffers for reading request bodies.
///
/// Buffers are handed out as [`PooledBuffer`] guards, which own the buffer exclusively until
/// they are dropped. On drop, the buffer is cleared and put back into the pool.
#[derive(Clone, Debug)]
pub struct BufferPool {
    buffers: Arc<Mutex<Vec<Vec<u8>>>>,
    max_idle: usize,
}

impl BufferPool {
    /// Creates a pool that keeps at most `max_idle` unused buffers.
    pub fn new(max_idle: usize) -> Self {
        Self {
            buffers: Arc::new(Mutex::new(Vec::with_capacity(max_idle))),
            max_idle,
        }
    }

    /// Checks out an empty buffer from the pool, allocating a new one if the pool is empty.
    pub fn get(&self) -> PooledBuffer {
        let buffer = self.buffers.lock().pop().unwrap_or_default();
        PooledBuffer {
            buffer,
            pool: self.clone(),
        }
    }

    /// Returns the number of idle buffers in the pool.
    #[cfg(test)]
    pub fn idle(&self) -> usize {
        self.buffers.lock().len()
    }

    fn put(&self, mut buffer: Vec<u8>) {
        if buffer.capacity() > MAX_POOLED_CAPACITY {
            return;
        }

        buffer.clear();
        let mut buffers = self.buffers.lock();
        if buffers.len() < self.max_idle {
            buffers.push(buffer);
        }
    }
}

/// A buffer checked out from a [`BufferPool`].
#[must_use]
#[derive(Debug)]
pub struct PooledBuffer {
    buffer: Vec<u8>,
    pool: BufferPool,
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.put(std::mem::take(&mut self.buffer));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_is_reset_on_return() {
        let pool = BufferPool::new(2);

        let mut buffer = pool.get();
        buffer.extend_from_slice(b"cpu value=1");
        let capacity = buffer.capacity();
        drop(buffer);

        assert_eq!(pool.idle(), 1);
        let buffer = pool.get();
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), capacity);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_max_idle() {
        let pool = BufferPool::new(1);
        let first = pool.get();
        let second = pool.get();
        drop(first);
        drop(second);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_large_buffers_are_dropped() {
        let pool = BufferPool::new(1);
        let mut buffer = pool.get();
        buffer.reserve(MAX_POOLED_CAPACITY + 1);
        drop(buffer);
        assert_eq!(pool.idle(), 0);
    }
}
