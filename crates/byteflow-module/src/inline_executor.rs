//! `InlineExecutor` — testing `IoExecutor`.
//!
//! The calling thread is treated as the I/O context: `in_io_thread()` is
//! true until shutdown and `execute()` runs the task before returning. Only for
//! single-threaded tests and tools; it gives up the single-I/O-thread
//! guarantee as soon as two threads drive it.

use byteflow_core::error::{FlowError, Result};
use byteflow_core::executor::{IoExecutor, Task};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct InlineExecutor {
    shutdown: AtomicBool,
    executed: AtomicUsize,
}

impl InlineExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse all further tasks.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Tasks run through `execute()` so far.
    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::Relaxed)
    }
}

impl IoExecutor for InlineExecutor {
    fn in_io_thread(&self) -> bool {
        !self.shutdown.load(Ordering::Relaxed)
    }

    fn execute(&self, task: Task) -> Result<()> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(FlowError::ExecutorUnavailable);
        }
        self.executed.fetch_add(1, Ordering::Relaxed);
        task();
        Ok(())
    }
}
