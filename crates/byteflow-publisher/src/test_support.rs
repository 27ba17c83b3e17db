//! Shared test doubles: a recording subscriber and a hand-cranked executor.

use byteflow_core::chunk::Chunk;
use byteflow_core::error::{FlowError, Result};
use byteflow_core::executor::{IoExecutor, Task};
use byteflow_core::flow::{Subscriber, Subscription};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Signal {
    Next(Vec<u8>),
    Error(String),
    Complete,
}

/// What `Recorder::on_next` does after recording the chunk.
#[derive(Debug, Clone, Copy, Default)]
enum OnNext {
    #[default]
    Nothing,
    Request(i64),
    Cancel,
}

/// Subscriber that records every signal and checks callback overlap.
#[derive(Default)]
pub(crate) struct Recorder {
    subscription: Mutex<Option<Arc<dyn Subscription>>>,
    signals: Mutex<Vec<Signal>>,
    events: Mutex<Option<mpsc::Sender<Signal>>>,
    on_next: OnNext,
    in_callback: AtomicBool,
    overlaps: AtomicUsize,
    depth: AtomicUsize,
    max_depth: AtomicUsize,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Calls `request(n)` from inside every `on_next`, whatever `n` is.
    pub fn requesting_on_next(n: i64) -> Arc<Self> {
        Arc::new(Self { on_next: OnNext::Request(n), ..Self::default() })
    }

    /// Calls `cancel()` from inside every `on_next`.
    pub fn cancelling_on_next() -> Arc<Self> {
        Arc::new(Self { on_next: OnNext::Cancel, ..Self::default() })
    }

    /// Forwards a copy of every signal to `tx`.
    pub fn notifying(tx: mpsc::Sender<Signal>) -> Arc<Self> {
        Arc::new(Self { events: Mutex::new(Some(tx)), ..Self::default() })
    }

    fn current(&self) -> Option<Arc<dyn Subscription>> {
        self.subscription.lock().unwrap().clone()
    }

    pub fn has_subscription(&self) -> bool {
        self.subscription.lock().unwrap().is_some()
    }

    pub fn request(&self, n: i64) {
        if let Some(s) = self.current() {
            s.request(n);
        }
    }

    pub fn cancel(&self) {
        if let Some(s) = self.current() {
            s.cancel();
        }
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.signals.lock().unwrap().clone()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.signals
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| match s {
                Signal::Next(b) => Some(b.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    pub fn next_count(&self) -> usize {
        self.signals
            .lock()
            .unwrap()
            .iter()
            .filter(|s| matches!(s, Signal::Next(_)))
            .count()
    }

    /// Terminal signals seen so far.
    pub fn terminal_count(&self) -> usize {
        self.signals
            .lock()
            .unwrap()
            .iter()
            .filter(|s| !matches!(s, Signal::Next(_)))
            .count()
    }

    pub fn is_complete(&self) -> bool {
        self.signals.lock().unwrap().last() == Some(&Signal::Complete)
    }

    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth.load(Ordering::SeqCst)
    }

    fn record(&self, signal: Signal) {
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.send(signal.clone());
        }
        self.signals.lock().unwrap().push(signal);
    }

    fn enter(&self) {
        if self.in_callback.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_depth.fetch_max(depth, Ordering::SeqCst);
    }

    fn exit(&self) {
        if self.depth.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.in_callback.store(false, Ordering::SeqCst);
        }
    }
}

impl Subscriber for Recorder {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        *self.subscription.lock().unwrap() = Some(subscription);
    }

    fn on_next(&self, chunk: Chunk<'_>) {
        self.enter();
        // Recorded before any reentrant request so order is preserved.
        self.record(Signal::Next(chunk.to_vec()));
        match self.on_next {
            OnNext::Nothing => {}
            OnNext::Request(n) => self.request(n),
            OnNext::Cancel => self.cancel(),
        }
        self.exit();
    }

    fn on_error(&self, error: FlowError) {
        self.enter();
        self.record(Signal::Error(error.to_string()));
        self.exit();
    }

    fn on_complete(&self) {
        self.enter();
        self.record(Signal::Complete);
        self.exit();
    }
}

/// Executor whose I/O thread is the test itself, cranked by `run_all()`.
/// `in_io_thread()` is false, so every dispatch is a hand-over.
#[derive(Default)]
pub(crate) struct ManualExecutor {
    queue: Mutex<VecDeque<Task>>,
    shutdown: AtomicBool,
}

impl ManualExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Run queued tasks, including ones they queue, until none are left.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.queue.lock().unwrap().pop_front();
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

impl IoExecutor for ManualExecutor {
    fn in_io_thread(&self) -> bool {
        false
    }

    fn execute(&self, task: Task) -> Result<()> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(FlowError::ExecutorUnavailable);
        }
        self.queue.lock().unwrap().push_back(task);
        Ok(())
    }
}
