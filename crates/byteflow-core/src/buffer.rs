//! Pooled buffer management.
//!
//! A `BufferPool` hands out fixed-capacity `PooledBuffer`s and takes them
//! back for reuse.
//!
//! # Implementors
//!
//! - `HeapBufferPool` (default): heap-allocated buffers recycled through a
//!   lock-free bounded free list. Allocates when the free list is empty.
//!
//! A `PooledBuffer` is filled from its start: `spare_mut()` is the region a
//! channel reads into, `advance()` commits what was read, `filled()` is the
//! region handed to the consumer and `clear()` rewinds for the next fill.

/// Fixed-capacity byte buffer with a fill position.
pub struct PooledBuffer {
    data: Box<[u8]>,
    len: usize,
}

impl PooledBuffer {
    /// Allocate a zeroed buffer of `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of filled bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Space left before the buffer is full.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.len
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.data.len()
    }

    /// The filled region.
    #[inline]
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// The unfilled region, for a channel to read into.
    #[inline]
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.len..]
    }

    /// Mark `n` more bytes as filled.
    ///
    /// # Panics
    ///
    /// If `n` exceeds `remaining()`.
    #[inline]
    pub fn advance(&mut self, n: usize) {
        assert!(n <= self.remaining(), "advance past buffer capacity");
        self.len += n;
    }

    /// Append as much of `src` as fits; returns the number of bytes copied.
    pub fn put_slice(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.remaining());
        self.spare_mut()[..n].copy_from_slice(&src[..n]);
        self.len += n;
        n
    }

    /// Rewind to empty. Capacity and storage are kept.
    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl core::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len)
            .field("capacity", &self.data.len())
            .finish()
    }
}

/// Source of reusable buffers.
///
/// **Contract:**
/// - `acquire()` never blocks. `None` means the pool cannot produce a
///   buffer right now.
/// - Acquired buffers are empty (`len() == 0`).
/// - `release()` accepts any buffer previously acquired from this pool;
///   the pool may keep it or drop it.
pub trait BufferPool: Send + Sync {
    /// Acquire an empty buffer of `buffer_capacity()` bytes.
    fn acquire(&self) -> Option<PooledBuffer>;

    /// Return a buffer to the pool.
    fn release(&self, buffer: PooledBuffer);

    /// Capacity of the buffers this pool hands out.
    fn buffer_capacity(&self) -> usize;

    /// Buffers currently parked in the pool.
    fn pooled(&self) -> usize {
        0
    }

    /// Buffers currently handed out.
    fn in_use(&self) -> usize {
        0
    }
}
