//! I/O context executor abstraction.
//!
//! An `IoExecutor` owns the single thread on which channel readiness is
//! delivered. The publisher runs all drain work there.
//!
//! # Implementors
//!
//! - `EventLoop` (default): dedicated OS thread running an epoll loop.
//!   `execute()` pushes onto a lock-free queue and wakes the loop.
//! - `InlineExecutor` (testing): the calling thread *is* the I/O context.
//!   `execute()` runs the task immediately.

use crate::error::Result;

/// A unit of work for the I/O context.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks on the I/O context.
///
/// **Contract:**
/// - `execute()` must NEVER block the caller.
/// - Tasks submitted from one thread run in submission order.
/// - Tasks never run concurrently with each other.
pub trait IoExecutor: Send + Sync {
    /// Whether the calling thread is the I/O context.
    fn in_io_thread(&self) -> bool;

    /// Queue `task` to run on the I/O context.
    ///
    /// Returns `Err(ExecutorUnavailable)` if the executor is shut down.
    fn execute(&self, task: Task) -> Result<()>;
}
