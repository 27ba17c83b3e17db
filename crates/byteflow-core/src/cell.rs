//! Non-blocking exclusive-access cell.
//!
//! Like a spinlock that never spins: `try_borrow_mut()` either takes the
//! cell or fails immediately. Used for state that is only ever touched
//! from one context at a time, where a failed borrow means a logic error
//! rather than contention worth waiting on.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// A cell granting at most one mutable borrow at a time, across threads.
pub struct ExclusiveCell<T> {
    borrowed: AtomicBool,
    data: UnsafeCell<T>,
}

// Safety: ExclusiveCell hands out at most one guard at a time
unsafe impl<T: Send> Send for ExclusiveCell<T> {}
unsafe impl<T: Send> Sync for ExclusiveCell<T> {}

impl<T> ExclusiveCell<T> {
    #[inline]
    pub const fn new(value: T) -> Self {
        Self {
            borrowed: AtomicBool::new(false),
            data: UnsafeCell::new(value),
        }
    }

    /// Take the cell, or return `None` if it is already borrowed.
    #[inline]
    pub fn try_borrow_mut(&self) -> Option<ExclusiveGuard<'_, T>> {
        self.borrowed
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| ExclusiveGuard { cell: self })
    }

    #[inline]
    pub fn is_borrowed(&self) -> bool {
        self.borrowed.load(Ordering::Relaxed)
    }

    /// Direct access through a unique reference; no flag needed.
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

/// RAII guard; releases the cell on drop.
pub struct ExclusiveGuard<'a, T> {
    cell: &'a ExclusiveCell<T>,
}

impl<T> Deref for ExclusiveGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // Safety: we hold the borrow flag
        unsafe { &*self.cell.data.get() }
    }
}

impl<T> DerefMut for ExclusiveGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // Safety: we hold the borrow flag
        unsafe { &mut *self.cell.data.get() }
    }
}

impl<T> Drop for ExclusiveGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.cell.borrowed.store(false, Ordering::Release);
    }
}
