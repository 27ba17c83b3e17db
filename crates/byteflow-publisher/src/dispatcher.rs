//! Dispatcher — run work on the I/O context, trampolined.
//!
//! `dispatch()` runs a task inline when the caller already is the I/O
//! thread and hands it to the executor otherwise. Either way the task runs
//! under a per-thread trampoline: a dispatch issued while another
//! dispatched task is running on the same thread is queued and run after
//! that task returns. Reentrant calls (a `request()` from inside
//! `on_next`) therefore never nest on the stack.

use byteflow_core::error::Result;
use byteflow_core::executor::{IoExecutor, Task};

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Default)]
struct Trampoline {
    active: bool,
    deferred: VecDeque<Task>,
}

thread_local! {
    static TRAMPOLINE: RefCell<Trampoline> = RefCell::new(Trampoline::default());
}

/// Clears the active flag even if a task unwinds.
struct ActiveGuard;

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        TRAMPOLINE.with(|t| t.borrow_mut().active = false);
    }
}

/// Run `task` now, or queue it behind the task currently running on this
/// thread.
pub(crate) fn run_trampolined(task: Task) {
    let first = TRAMPOLINE.with(|t| {
        let mut t = t.borrow_mut();
        if t.active {
            t.deferred.push_back(task);
            None
        } else {
            t.active = true;
            Some(task)
        }
    });
    let Some(first) = first else { return };

    let _guard = ActiveGuard;
    first();
    while let Some(next) = TRAMPOLINE.with(|t| t.borrow_mut().deferred.pop_front()) {
        next();
    }
}

/// Tasks queued behind the running one on this thread.
pub fn deferred_on_this_thread() -> usize {
    TRAMPOLINE.with(|t| t.borrow().deferred.len())
}

#[derive(Clone)]
pub struct Dispatcher {
    executor: Arc<dyn IoExecutor>,
}

impl Dispatcher {
    pub fn new(executor: Arc<dyn IoExecutor>) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &Arc<dyn IoExecutor> {
        &self.executor
    }

    #[inline]
    pub fn in_io_thread(&self) -> bool {
        self.executor.in_io_thread()
    }

    /// Run `task` on the I/O context.
    ///
    /// Fails only when the task has to be handed over and the executor
    /// refuses it; the task is dropped in that case.
    pub fn dispatch(&self, task: Task) -> Result<()> {
        if self.executor.in_io_thread() {
            run_trampolined(task);
            Ok(())
        } else {
            self.executor.execute(Box::new(move || run_trampolined(task)))
        }
    }
}
