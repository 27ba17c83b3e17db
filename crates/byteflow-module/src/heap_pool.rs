//! `HeapBufferPool` — default `BufferPool` implementation.
//!
//! Buffers are plain heap allocations. Released buffers go onto a bounded
//! lock-free free list (`ArrayQueue`); when the list is full the buffer is
//! simply dropped. `acquire()` pops from the free list and allocates only
//! when it is empty.

use byteflow_core::buffer::{BufferPool, PooledBuffer};

use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::PoolConfig;

pub struct HeapBufferPool {
    buffer_capacity: usize,
    /// Released buffers waiting for reuse.
    free: ArrayQueue<PooledBuffer>,
    /// Upper bound on buffers out at once (0 = unbounded).
    max_outstanding: usize,
    /// Buffers currently handed out.
    in_use: AtomicUsize,
    /// Total allocations (for diagnostics).
    allocated: AtomicUsize,
}

impl HeapBufferPool {
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            buffer_capacity: config.buffer_capacity.max(1),
            free: ArrayQueue::new(config.max_pooled.max(1)),
            max_outstanding: config.max_outstanding,
            in_use: AtomicUsize::new(0),
            allocated: AtomicUsize::new(0),
        }
    }

    /// Pool of `buffer_capacity`-byte buffers with default limits.
    pub fn with_buffer_capacity(buffer_capacity: usize) -> Self {
        Self::new(&PoolConfig::new().buffer_capacity(buffer_capacity))
    }

    /// Total buffers ever allocated by this pool.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Reserve an in-use slot, honoring `max_outstanding`.
    fn reserve_slot(&self) -> bool {
        if self.max_outstanding == 0 {
            self.in_use.fetch_add(1, Ordering::AcqRel);
            return true;
        }
        let mut current = self.in_use.load(Ordering::Acquire);
        loop {
            if current >= self.max_outstanding {
                return false;
            }
            match self.in_use.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for HeapBufferPool {
    fn default() -> Self {
        Self::new(&PoolConfig::from_env())
    }
}

impl BufferPool for HeapBufferPool {
    fn acquire(&self) -> Option<PooledBuffer> {
        if !self.reserve_slot() {
            return None;
        }
        let buffer = self.free.pop().unwrap_or_else(|| {
            self.allocated.fetch_add(1, Ordering::Relaxed);
            PooledBuffer::with_capacity(self.buffer_capacity)
        });
        Some(buffer)
    }

    fn release(&self, mut buffer: PooledBuffer) {
        let _ = self
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));

        // Foreign-sized buffers are not recycled.
        if buffer.capacity() != self.buffer_capacity {
            return;
        }
        buffer.clear();
        // Free list full: let it drop.
        let _ = self.free.push(buffer);
    }

    fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    fn pooled(&self) -> usize {
        self.free.len()
    }

    fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release_reuses() {
        let pool = HeapBufferPool::with_buffer_capacity(16);
        let mut buf = pool.acquire().unwrap();
        assert_eq!(buf.capacity(), 16);
        assert_eq!(pool.in_use(), 1);

        buf.put_slice(b"hello");
        pool.release(buf);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.pooled(), 1);

        let buf = pool.acquire().unwrap();
        assert!(buf.is_empty(), "recycled buffers come back cleared");
        assert_eq!(pool.allocated(), 1);
        pool.release(buf);
    }

    #[test]
    fn test_free_list_bounded() {
        let pool = HeapBufferPool::new(&PoolConfig::new().buffer_capacity(4).max_pooled(1));
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.pooled(), 1);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_max_outstanding() {
        let pool = HeapBufferPool::new(&PoolConfig::new().buffer_capacity(4).max_outstanding(1));
        let a = pool.acquire().unwrap();
        assert!(pool.acquire().is_none());
        pool.release(a);
        assert!(pool.acquire().is_some());
    }

    #[test]
    fn test_foreign_buffer_dropped() {
        let pool = HeapBufferPool::with_buffer_capacity(8);
        let _held = pool.acquire().unwrap();
        pool.release(PooledBuffer::with_capacity(3));
        assert_eq!(pool.pooled(), 0);
    }
}
