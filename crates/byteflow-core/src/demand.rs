//! Outstanding demand counter
//!
//! Every update is a compare-and-swap loop on one `AtomicI64`. The value
//! never goes below zero and saturates at `UNBOUNDED`, which means "emit
//! without limit" and is never decremented.

use core::sync::atomic::{AtomicI64, Ordering};

/// Sentinel for unbounded demand.
pub const UNBOUNDED: i64 = i64::MAX;

/// Lock-free, non-negative demand counter.
#[derive(Debug, Default)]
pub struct Demand {
    value: AtomicI64,
}

impl Demand {
    pub const fn new() -> Self {
        Self { value: AtomicI64::new(0) }
    }

    /// Current outstanding demand.
    #[inline]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.get() == 0
    }

    #[inline]
    pub fn is_unbounded(&self) -> bool {
        self.get() == UNBOUNDED
    }

    /// Add `n` (> 0) to the demand, saturating at `UNBOUNDED`.
    ///
    /// Returns the previous value.
    pub fn add(&self, n: i64) -> i64 {
        debug_assert!(n > 0, "demand increment must be positive");
        let mut current = self.value.load(Ordering::Acquire);
        loop {
            if current == UNBOUNDED {
                return current;
            }
            let next = current.saturating_add(n);
            match self.value.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(prev) => return prev,
                Err(actual) => current = actual,
            }
        }
    }

    /// Consume one unit of demand.
    ///
    /// Returns `false` without touching the counter when it is zero.
    /// Unbounded demand is left as is.
    pub fn try_take_one(&self) -> bool {
        let mut current = self.value.load(Ordering::Acquire);
        loop {
            if current <= 0 {
                return false;
            }
            if current == UNBOUNDED {
                return true;
            }
            match self.value.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}
