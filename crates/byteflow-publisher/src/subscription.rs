//! `ChannelSubscription` — demand tracking and the drain loop.
//!
//! ```text
//!            request / readiness
//!   Idle ─────────────────────────► Draining ──► AwaitingReadiness
//!    ▲                                │  │              │
//!    └──────── demand exhausted ──────┘  │   readiness  │
//!                                        │ ◄────────────┘
//!   any state ── cancel / EOF / error ──► Closed
//! ```
//!
//! Two atomics carry the cross-thread state: `closed`, whose first
//! successful CAS owns the terminal transition, and `state`, the
//! single-flight guard around the drain. Everything else (channel,
//! buffer, subscriber reference) sits in an `ExclusiveCell` that only the
//! I/O thread borrows, one dispatched task at a time.
//!
//! A `cancel` or invalid `request` parks its reason next to `closed`.
//! Whichever of `finish` or the drain loop next holds the resources
//! delivers it, so the subscriber sees exactly one terminal signal.

use byteflow_core::buffer::{BufferPool, PooledBuffer};
use byteflow_core::cell::ExclusiveCell;
use byteflow_core::channel::{ChannelSource, ReadStatus, SourceChannel};
use byteflow_core::chunk::Chunk;
use byteflow_core::demand::Demand;
use byteflow_core::error::FlowError;
use byteflow_core::executor::IoExecutor;
use byteflow_core::flow::{Subscriber, Subscription};
use byteflow_core::{kdebug, kerror, ktrace, kwarn};

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::dispatcher::Dispatcher;

const IDLE: u8 = 0;
const DRAINING: u8 = 1;
const AWAITING_READINESS: u8 = 2;

/// Observable state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Idle,
    Draining,
    AwaitingReadiness,
    Closed,
}

/// Terminal transitions claimed outside the drain loop.
#[derive(Debug, Clone, Copy)]
enum Claimed {
    Cancelled,
    InvalidDemand(i64),
    ExecutorUnavailable,
}

impl Claimed {
    fn error(self) -> Option<FlowError> {
        match self {
            Claimed::Cancelled => None,
            Claimed::InvalidDemand(n) => Some(FlowError::InvalidDemand(n)),
            Claimed::ExecutorUnavailable => Some(FlowError::ExecutorUnavailable),
        }
    }
}

/// How one drain pass ended.
enum Exit {
    /// Demand exhausted; wait for `request()`.
    Idle,
    /// Channel would block; reads resumed, listener registered.
    AwaitReadiness,
    /// State already released before an emission; nothing left to do.
    Yielded,
    /// Someone else closed the subscription.
    Closed,
    Complete,
    Failed(FlowError),
}

#[derive(Default)]
struct Resources {
    subscriber: Option<Arc<dyn Subscriber>>,
    channel: Option<Box<dyn SourceChannel>>,
    buffer: Option<PooledBuffer>,
    listener_registered: bool,
}

pub struct ChannelSubscription {
    closed: AtomicBool,
    state: AtomicU8,
    demand: Demand,
    source: Arc<dyn ChannelSource>,
    pool: Arc<dyn BufferPool>,
    dispatcher: Dispatcher,
    resources: ExclusiveCell<Resources>,
    /// Reason behind a `closed` claimed outside the drain loop.
    pending: Mutex<Option<Claimed>>,
    this: Weak<ChannelSubscription>,
}

impl ChannelSubscription {
    pub(crate) fn new(
        subscriber: Arc<dyn Subscriber>,
        source: Arc<dyn ChannelSource>,
        pool: Arc<dyn BufferPool>,
        executor: Arc<dyn IoExecutor>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            closed: AtomicBool::new(false),
            state: AtomicU8::new(IDLE),
            demand: Demand::new(),
            source,
            pool,
            dispatcher: Dispatcher::new(executor),
            resources: ExclusiveCell::new(Resources {
                subscriber: Some(subscriber),
                ..Resources::default()
            }),
            pending: Mutex::new(None),
            this: this.clone(),
        })
    }

    /// Outstanding demand.
    pub fn demand(&self) -> i64 {
        self.demand.get()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn state(&self) -> SubscriptionState {
        if self.is_closed() {
            return SubscriptionState::Closed;
        }
        match self.state.load(Ordering::Acquire) {
            DRAINING => SubscriptionState::Draining,
            AWAITING_READINESS => SubscriptionState::AwaitingReadiness,
            _ => SubscriptionState::Idle,
        }
    }

    /// Win the terminal transition. Exactly one caller ever gets `true`.
    fn claim_terminal(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claim the terminal transition on behalf of someone other than the
    /// drain loop; the reason waits in `pending` for `finish`.
    fn claim(&self, claimed: Claimed) -> bool {
        if !self.claim_terminal() {
            return false;
        }
        *self.lock_pending() = Some(claimed);
        true
    }

    fn lock_pending(&self) -> MutexGuard<'_, Option<Claimed>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn enter_drain(&self) -> bool {
        [IDLE, AWAITING_READINESS].iter().any(|&from| {
            self.state
                .compare_exchange(from, DRAINING, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        })
    }

    fn schedule_drain(&self) {
        let Some(this) = self.this.upgrade() else { return };
        if let Err(e) = self.dispatcher.dispatch(Box::new(move || this.drain())) {
            kwarn!("subscription: cannot schedule drain: {}", e);
            if self.claim(Claimed::ExecutorUnavailable) {
                self.finish();
            }
        }
    }

    fn on_readable(&self) {
        ktrace!("subscription: channel readable");
        self.schedule_drain();
    }

    /// Finish a claimed terminal transition on the I/O thread.
    fn finish_later(&self) {
        let Some(this) = self.this.upgrade() else { return };
        if let Err(e) = self.dispatcher.dispatch(Box::new(move || this.finish())) {
            kwarn!("subscription: {}; finishing on caller thread", e);
            self.finish();
        }
    }

    /// Release resources and deliver the pending terminal signal, if any.
    ///
    /// Only this consumes the subscriber after a `claim`. When the
    /// resources are busy the holder calls back in once it lets go.
    fn finish(&self) {
        let Some(mut res) = self.resources.try_borrow_mut() else {
            ktrace!("subscription: resources busy, finish left to holder");
            return;
        };
        self.release(&mut res);
        let Some(claimed) = self.lock_pending().take() else {
            return;
        };
        let subscriber = res.subscriber.take();
        drop(res);

        if let (Some(subscriber), Some(error)) = (subscriber, claimed.error()) {
            subscriber.on_error(error);
        }
    }

    /// Return the buffer and close the channel. Safe to repeat.
    fn release(&self, res: &mut Resources) {
        if let Some(buffer) = res.buffer.take() {
            self.pool.release(buffer);
        }
        if let Some(mut channel) = res.channel.take() {
            if let Err(e) = channel.close() {
                kwarn!("subscription: channel close failed: {}", e);
            }
        }
        res.listener_registered = false;
    }

    fn drain(&self) {
        if !self.is_closed() && self.enter_drain() {
            self.run_pass();
        }
        // A claim made while the pass held the resources lands here.
        if self.is_closed() {
            self.finish();
        }
    }

    fn run_pass(&self) {
        let Some(mut res) = self.resources.try_borrow_mut() else {
            kerror!("subscription: drain entered while resources are borrowed");
            self.state.store(IDLE, Ordering::Release);
            return;
        };

        let error = match self.drain_pass(&mut res) {
            Exit::Idle => {
                self.state.store(IDLE, Ordering::Release);
                return;
            }
            Exit::AwaitReadiness => {
                self.state.store(AWAITING_READINESS, Ordering::Release);
                return;
            }
            Exit::Yielded => return,
            Exit::Closed => {
                self.release(&mut res);
                return;
            }
            Exit::Complete => None,
            Exit::Failed(error) => Some(error),
        };

        self.release(&mut res);
        if !self.claim_terminal() {
            // Lost to a claim; its reason is the one delivered.
            return;
        }
        let subscriber = res.subscriber.take();
        drop(res);
        let Some(subscriber) = subscriber else { return };
        match error {
            None => {
                kdebug!("subscription: complete");
                subscriber.on_complete();
            }
            Some(error) => {
                kwarn!("subscription: failed: {}", error);
                subscriber.on_error(error);
            }
        }
    }

    fn drain_pass(&self, res: &mut Resources) -> Exit {
        loop {
            if self.is_closed() {
                return Exit::Closed;
            }
            if self.demand.is_zero() {
                return Exit::Idle;
            }

            // ── Channel (lazy) ──
            if res.channel.is_none() {
                match self.source.open_channel() {
                    Ok(Some(channel)) => res.channel = Some(channel),
                    // Nothing left to read.
                    Ok(None) => return Exit::Complete,
                    Err(e) => return Exit::Failed(e),
                }
            }

            // ── Buffer (kept across passes until emitted) ──
            if res.buffer.is_none() {
                match self.pool.acquire() {
                    Some(buffer) => res.buffer = Some(buffer),
                    None => return Exit::Failed(FlowError::PoolExhausted),
                }
            }

            // The end-of-stream check may have filled it.
            if is_full(res) {
                return self.emit_full(res);
            }

            let status = match read(res) {
                Ok(status) => status,
                Err(e) => return Exit::Failed(FlowError::Io(e)),
            };
            ktrace!("subscription: read {:?}", status);

            match status {
                ReadStatus::WouldBlock => {
                    if let Err(e) = self.await_readiness(res) {
                        return Exit::Failed(FlowError::Io(e));
                    }
                    if self.is_closed() {
                        return Exit::Closed;
                    }
                    return Exit::AwaitReadiness;
                }
                ReadStatus::Eof => {
                    if buffered(res) == 0 {
                        return Exit::Complete;
                    }
                    if !self.demand.try_take_one() {
                        // Residue waits for the next request.
                        suspend(res);
                        return Exit::Idle;
                    }
                    emit(res);
                    if self.is_closed() {
                        return Exit::Closed;
                    }
                    return Exit::Complete;
                }
                ReadStatus::Data(_) if is_full(res) => return self.emit_full(res),
                ReadStatus::Data(_) => {}
            }
        }
    }

    /// Emit a full buffer against one unit of demand.
    fn emit_full(&self, res: &mut Resources) -> Exit {
        if !self.demand.try_take_one() {
            // Stays buffered until the next request, like EOF residue.
            suspend(res);
            return Exit::Idle;
        }
        // Reentrant request() from on_next starts a fresh drain.
        self.state.store(IDLE, Ordering::Release);
        emit(res);

        if self.is_closed() {
            return Exit::Closed;
        }
        if !self.demand.is_zero() {
            self.schedule_drain();
            return Exit::Yielded;
        }
        self.check_end(res)
    }

    /// Demand ran out right after a full emission: one more read so an
    /// already-reached end of stream completes without another request.
    /// Whatever else it reads stays buffered, full or not.
    fn check_end(&self, res: &mut Resources) -> Exit {
        if self
            .state
            .compare_exchange(IDLE, DRAINING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Exit::Yielded;
        }
        match read(res) {
            Err(e) => Exit::Failed(FlowError::Io(e)),
            Ok(ReadStatus::Eof) if buffered(res) == 0 => Exit::Complete,
            Ok(_) => {
                suspend(res);
                Exit::Idle
            }
        }
    }

    fn await_readiness(&self, res: &mut Resources) -> io::Result<()> {
        let Some(channel) = res.channel.as_mut() else {
            return Ok(());
        };
        if !res.listener_registered {
            let weak = self.this.clone();
            channel.set_read_listener(Arc::new(move || {
                if let Some(subscription) = weak.upgrade() {
                    subscription.on_readable();
                }
            }))?;
            res.listener_registered = true;
        }
        channel.resume_reads()
    }
}

fn read(res: &mut Resources) -> io::Result<ReadStatus> {
    match (res.channel.as_mut(), res.buffer.as_mut()) {
        (Some(channel), Some(buffer)) => channel.read(buffer),
        _ => Err(io::Error::new(io::ErrorKind::NotConnected, "no channel or buffer")),
    }
}

fn buffered(res: &Resources) -> usize {
    res.buffer.as_ref().map_or(0, PooledBuffer::len)
}

fn is_full(res: &Resources) -> bool {
    res.buffer.as_ref().is_some_and(PooledBuffer::is_full)
}

fn suspend(res: &mut Resources) {
    if let Some(channel) = res.channel.as_mut() {
        if let Err(e) = channel.suspend_reads() {
            kwarn!("subscription: suspend reads failed: {}", e);
        }
    }
}

/// Hand the filled bytes to the subscriber, then clear the buffer.
fn emit(res: &mut Resources) {
    let (Some(subscriber), Some(buffer)) = (res.subscriber.clone(), res.buffer.as_mut()) else {
        return;
    };
    subscriber.on_next(Chunk::new(buffer.filled()));
    buffer.clear();
}

impl Subscription for ChannelSubscription {
    fn request(&self, n: i64) {
        if self.is_closed() {
            return;
        }
        if n <= 0 {
            if self.claim(Claimed::InvalidDemand(n)) {
                kwarn!("subscription: invalid request({})", n);
                self.finish_later();
            }
            return;
        }
        let prev = self.demand.add(n);
        ktrace!("subscription: request({}) demand {} -> {}", n, prev, self.demand.get());
        self.schedule_drain();
    }

    fn cancel(&self) {
        if self.claim(Claimed::Cancelled) {
            kdebug!("subscription: cancelled");
            self.finish_later();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::ChannelPublisher;
    use crate::test_support::{ManualExecutor, Recorder, Signal};
    use byteflow_core::demand::UNBOUNDED;
    use byteflow_core::flow::Publisher;
    use byteflow_module::{HeapBufferPool, InlineExecutor, PoolConfig, ScriptHandle, ScriptedChannel, ScriptedSource, Step};

    struct Fixture {
        publisher: ChannelPublisher,
        handle: ScriptHandle,
        pool: Arc<HeapBufferPool>,
    }

    impl Fixture {
        fn new(steps: Vec<Step>, capacity: usize) -> Self {
            Self::with_executor(steps, capacity, Arc::new(InlineExecutor::new()))
        }

        fn with_executor(steps: Vec<Step>, capacity: usize, executor: Arc<dyn IoExecutor>) -> Self {
            let (channel, handle) = ScriptedChannel::new(steps);
            let pool = Arc::new(HeapBufferPool::with_buffer_capacity(capacity));
            let publisher = ChannelPublisher::new(
                Arc::new(ScriptedSource::new(channel)),
                pool.clone(),
                executor,
            );
            Self { publisher, handle, pool }
        }

        fn subscribe(&self, recorder: &Arc<Recorder>) -> Arc<ChannelSubscription> {
            self.publisher.subscribe(recorder.clone());
            self.publisher.subscription().unwrap()
        }
    }

    fn next(bytes: &[u8]) -> Signal {
        Signal::Next(bytes.to_vec())
    }

    #[test]
    fn test_eof_with_residue_emits_once_then_completes() {
        let f = Fixture::new(
            vec![Step::data(b"abcde"), Step::WouldBlock, Step::data(b"fgh"), Step::Eof],
            8,
        );
        let rec = Recorder::new();
        let sub = f.subscribe(&rec);

        rec.request(1);
        assert_eq!(sub.state(), SubscriptionState::AwaitingReadiness);
        assert!(rec.signals().is_empty());
        assert!(f.handle.is_armed());

        assert!(f.handle.fire_readable());
        assert_eq!(rec.signals(), vec![next(b"abcdefgh"), Signal::Complete]);
        assert_eq!(sub.state(), SubscriptionState::Closed);
        assert_eq!(sub.demand(), 0);
        assert_eq!(f.handle.closes(), 1);
        assert_eq!(f.pool.in_use(), 0);
    }

    #[test]
    fn test_empty_eof_completes_directly() {
        let f = Fixture::new(vec![Step::Eof], 8);
        let rec = Recorder::new();
        f.subscribe(&rec);

        rec.request(1);
        assert_eq!(rec.signals(), vec![Signal::Complete]);
        assert_eq!(f.handle.closes(), 1);
    }

    #[test]
    fn test_partial_buffer_flushes_at_eof() {
        let f = Fixture::new(vec![Step::data(b"xyz"), Step::Eof], 8);
        let rec = Recorder::new();
        f.subscribe(&rec);

        rec.request(3);
        assert_eq!(rec.signals(), vec![next(b"xyz"), Signal::Complete]);
    }

    #[test]
    fn test_invalid_demand() {
        for n in [0, -1] {
            let f = Fixture::new(vec![Step::data(b"abcd"), Step::Eof], 4);
            let rec = Recorder::new();
            let sub = f.subscribe(&rec);

            rec.request(n);
            rec.request(5);
            assert_eq!(
                rec.signals(),
                vec![Signal::Error(FlowError::InvalidDemand(n).to_string())]
            );
            assert!(sub.is_closed());
            assert_eq!(f.handle.reads(), 0);
        }
    }

    #[test]
    fn test_double_subscribe_leaves_first_alone() {
        let f = Fixture::new(vec![Step::data(b"hi"), Step::Eof], 4);
        let first = Recorder::new();
        let second = Recorder::new();
        f.publisher.subscribe(first.clone());
        f.publisher.subscribe(second.clone());

        assert_eq!(
            second.signals(),
            vec![Signal::Error(FlowError::AlreadySubscribed.to_string())]
        );
        // Second got an inert subscription.
        second.request(1);
        assert_eq!(f.handle.reads(), 0);

        first.request(1);
        assert_eq!(first.signals(), vec![next(b"hi"), Signal::Complete]);
    }

    #[test]
    fn test_cancel_is_silent_and_idempotent() {
        let f = Fixture::new(vec![Step::data(b"ab")], 4);
        let rec = Recorder::new();
        let sub = f.subscribe(&rec);

        rec.request(1);
        assert_eq!(sub.state(), SubscriptionState::AwaitingReadiness);
        assert_eq!(f.pool.in_use(), 1);

        rec.cancel();
        rec.cancel();
        assert_eq!(f.handle.closes(), 1);
        assert_eq!(f.pool.in_use(), 0);
        assert!(!f.handle.fire_unarmed(), "listener dropped on close");

        rec.request(1);
        assert!(rec.signals().is_empty());
        assert_eq!(sub.state(), SubscriptionState::Closed);
    }

    #[test]
    fn test_cancel_after_complete_is_noop() {
        let f = Fixture::new(vec![Step::Eof], 4);
        let rec = Recorder::new();
        f.subscribe(&rec);

        rec.request(1);
        rec.cancel();
        rec.request(-1);
        assert_eq!(rec.signals(), vec![Signal::Complete]);
        assert_eq!(f.handle.closes(), 1);
    }

    #[test]
    fn test_cancel_releases_on_io_thread() {
        let exec = Arc::new(ManualExecutor::new());
        let f = Fixture::with_executor(vec![Step::data(b"ab")], 4, exec.clone());
        let rec = Recorder::new();
        let sub = f.subscribe(&rec);

        rec.request(1);
        exec.run_all();
        assert_eq!(sub.state(), SubscriptionState::AwaitingReadiness);

        rec.cancel();
        assert!(sub.is_closed());
        assert_eq!(f.handle.closes(), 0, "release waits for the I/O thread");
        exec.run_all();
        assert_eq!(f.handle.closes(), 1);
        assert_eq!(f.pool.in_use(), 0);
        assert!(rec.signals().is_empty());
    }

    #[test]
    fn test_residue_waits_for_demand() {
        let f = Fixture::new(vec![Step::data(b"abcdef")], 4);
        let rec = Recorder::new();
        let sub = f.subscribe(&rec);

        rec.request(1);
        assert_eq!(rec.signals(), vec![next(b"abcd")]);
        assert_eq!(sub.state(), SubscriptionState::Idle);
        assert_eq!(f.handle.suspends(), 1);

        f.handle.push(Step::Eof);
        rec.request(1);
        assert_eq!(
            rec.signals(),
            vec![next(b"abcd"), next(b"ef"), Signal::Complete]
        );
    }

    #[test]
    fn test_reentrant_request_does_not_recurse() {
        let total = 4 * 20_000;
        let data: Vec<u8> = (0..total).map(|i| (i % 251) as u8).collect();
        let f = Fixture::new(vec![Step::Data(data.clone()), Step::Eof], 4);
        let rec = Recorder::requesting_on_next(1);
        f.subscribe(&rec);

        rec.request(1);
        assert!(rec.is_complete());
        assert_eq!(rec.max_depth(), 1);
        assert_eq!(rec.bytes(), data);
        assert_eq!(rec.next_count(), 20_000);
    }

    #[test]
    fn test_read_error() {
        let f = Fixture::new(
            vec![Step::data(b"ab"), Step::Error(io::ErrorKind::ConnectionReset)],
            8,
        );
        let rec = Recorder::new();
        let sub = f.subscribe(&rec);

        rec.request(1);
        let signals = rec.signals();
        assert_eq!(signals.len(), 1);
        assert!(matches!(&signals[0], Signal::Error(msg) if msg.starts_with("channel I/O error")));
        assert!(sub.is_closed());
        assert_eq!(f.handle.closes(), 1);
        assert_eq!(f.pool.in_use(), 0);
    }

    #[test]
    fn test_source_already_complete() {
        let pool = Arc::new(HeapBufferPool::with_buffer_capacity(8));
        let publisher = ChannelPublisher::new(
            Arc::new(ScriptedSource::complete()),
            pool.clone(),
            Arc::new(InlineExecutor::new()),
        );
        let rec = Recorder::new();
        publisher.subscribe(rec.clone());
        rec.request(1);
        assert_eq!(rec.signals(), vec![Signal::Complete]);
        assert_eq!(pool.allocated(), 0);
    }

    #[test]
    fn test_source_unavailable() {
        let publisher = ChannelPublisher::new(
            Arc::new(ScriptedSource::unavailable()),
            Arc::new(HeapBufferPool::with_buffer_capacity(8)),
            Arc::new(InlineExecutor::new()),
        );
        let rec = Recorder::new();
        publisher.subscribe(rec.clone());
        rec.request(1);
        assert_eq!(
            rec.signals(),
            vec![Signal::Error("failed to acquire channel".to_string())]
        );
    }

    #[test]
    fn test_pool_exhausted() {
        let (channel, handle) = ScriptedChannel::new(vec![Step::data(b"ab")]);
        let pool = Arc::new(HeapBufferPool::new(
            &PoolConfig::new().buffer_capacity(4).max_outstanding(1),
        ));
        let held = pool.acquire().unwrap();
        let publisher = ChannelPublisher::new(
            Arc::new(ScriptedSource::new(channel)),
            pool.clone(),
            Arc::new(InlineExecutor::new()),
        );
        let rec = Recorder::new();
        publisher.subscribe(rec.clone());
        rec.request(1);

        assert_eq!(
            rec.signals(),
            vec![Signal::Error(FlowError::PoolExhausted.to_string())]
        );
        assert_eq!(handle.closes(), 1);
        pool.release(held);
    }

    #[test]
    fn test_unbounded_demand_is_sticky() {
        let f = Fixture::new(vec![Step::data(b"aabbcc"), Step::Eof], 2);
        let rec = Recorder::new();
        let sub = f.subscribe(&rec);

        rec.request(UNBOUNDED);
        rec.request(10);
        assert_eq!(sub.demand(), UNBOUNDED);
        assert_eq!(
            rec.signals(),
            vec![next(b"aa"), next(b"bb"), next(b"cc"), Signal::Complete]
        );
    }

    #[test]
    fn test_demand_exhausted_stops_reading() {
        let f = Fixture::new(vec![Step::data(b"aabbccdd")], 2);
        let rec = Recorder::new();
        let sub = f.subscribe(&rec);

        rec.request(2);
        assert_eq!(rec.signals(), vec![next(b"aa"), next(b"bb")]);
        assert_eq!(sub.demand(), 0);
        assert!(!f.handle.is_armed());
        // The end-of-stream read pulled "cc" into the buffer; "dd" is untouched.
        assert_eq!(f.handle.pending_steps(), 1);

        rec.request(1);
        assert_eq!(rec.signals(), vec![next(b"aa"), next(b"bb"), next(b"cc")]);
        assert_eq!(f.handle.pending_steps(), 0);

        f.handle.push(Step::Eof);
        rec.request(1);
        assert_eq!(
            rec.signals(),
            vec![next(b"aa"), next(b"bb"), next(b"cc"), next(b"dd"), Signal::Complete]
        );
    }

    #[test]
    fn test_full_buffer_from_end_check_emits_on_next_request() {
        let f = Fixture::new(vec![Step::data(b"aabb")], 2);
        let rec = Recorder::new();
        let sub = f.subscribe(&rec);

        rec.request(1);
        assert_eq!(rec.signals(), vec![next(b"aa")]);
        assert_eq!(f.pool.in_use(), 1);

        let reads = f.handle.reads();
        rec.request(1);
        assert_eq!(rec.signals(), vec![next(b"aa"), next(b"bb")]);
        assert_eq!(sub.state(), SubscriptionState::Idle);
        assert_eq!(sub.demand(), 0);
        // "bb" went out without reading first.
        assert_eq!(f.handle.reads(), reads + 1);
    }

    #[test]
    fn test_invalid_request_inside_on_next_mid_stream() {
        let f = Fixture::new(vec![Step::data(b"aabbcc")], 2);
        let rec = Recorder::requesting_on_next(0);
        let sub = f.subscribe(&rec);

        rec.request(1);
        assert_eq!(
            rec.signals(),
            vec![next(b"aa"), Signal::Error(FlowError::InvalidDemand(0).to_string())]
        );
        assert!(sub.is_closed());
        assert_eq!(f.handle.closes(), 1);
        assert_eq!(f.pool.in_use(), 0);
    }

    #[test]
    fn test_invalid_request_inside_on_next_at_eof() {
        let f = Fixture::new(vec![Step::data(b"a"), Step::Eof], 8);
        let rec = Recorder::requesting_on_next(-1);
        f.subscribe(&rec);

        rec.request(1);
        assert_eq!(
            rec.signals(),
            vec![next(b"a"), Signal::Error(FlowError::InvalidDemand(-1).to_string())]
        );
        assert_eq!(rec.terminal_count(), 1);
        assert_eq!(f.handle.closes(), 1);
        assert_eq!(f.pool.in_use(), 0);
    }

    #[test]
    fn test_invalid_request_handed_over_mid_pass() {
        let exec = Arc::new(ManualExecutor::new());
        let f = Fixture::with_executor(vec![Step::data(b"aabbcc"), Step::Eof], 2, exec.clone());
        let rec = Recorder::requesting_on_next(-5);
        let sub = f.subscribe(&rec);

        rec.request(UNBOUNDED);
        exec.run_all();
        assert_eq!(
            rec.signals(),
            vec![next(b"aa"), Signal::Error(FlowError::InvalidDemand(-5).to_string())]
        );
        assert!(sub.is_closed());
        assert_eq!(exec.pending(), 0);
        assert_eq!(f.pool.in_use(), 0);
    }

    #[test]
    fn test_cancel_inside_on_next() {
        let f = Fixture::new(vec![Step::data(b"aabbcc"), Step::Eof], 2);
        let rec = Recorder::cancelling_on_next();
        let sub = f.subscribe(&rec);

        rec.request(UNBOUNDED);
        assert_eq!(rec.signals(), vec![next(b"aa")]);
        assert!(sub.is_closed());
        assert_eq!(f.handle.closes(), 1);
        assert_eq!(f.pool.in_use(), 0);
        // Subscriber reference dropped on release.
        assert_eq!(Arc::strong_count(&rec), 1);
    }

    #[test]
    fn test_executor_down_fails_subscription() {
        let exec = Arc::new(ManualExecutor::new());
        let f = Fixture::with_executor(vec![Step::data(b"ab")], 4, exec.clone());
        let rec = Recorder::new();
        let sub = f.subscribe(&rec);

        exec.shutdown();
        rec.request(1);
        assert!(sub.is_closed());
        assert_eq!(
            rec.signals(),
            vec![Signal::Error(FlowError::ExecutorUnavailable.to_string())]
        );
    }

    #[cfg(target_os = "linux")]
    mod threaded {
        use super::*;
        use byteflow_module::{EventLoop, EventLoopConfig, FdChannelSource};
        use std::io::Write;
        use std::os::fd::OwnedFd;
        use std::os::unix::net::UnixStream;
        use std::sync::mpsc;
        use std::thread;
        use std::time::Duration;

        const WAIT: Duration = Duration::from_secs(10);

        #[test]
        fn test_socket_stream_sequential_and_intact() {
            let el = EventLoop::start(EventLoopConfig::new().thread_name("flow-sub-io")).unwrap();
            let io = el.handle();
            let (mut writer, reader) = UnixStream::pair().unwrap();
            let pool = Arc::new(HeapBufferPool::with_buffer_capacity(1024));
            let publisher = ChannelPublisher::new(
                Arc::new(FdChannelSource::new(OwnedFd::from(reader), io.clone())),
                pool.clone(),
                io,
            );

            let (tx, rx) = mpsc::channel();
            let rec = Recorder::notifying(tx);
            publisher.subscribe(rec.clone());
            let sub = publisher.subscription().unwrap();

            let expected: Vec<u8> = (0..256 * 1024).map(|i| (i * 31 % 251) as u8).collect();
            let payload = expected.clone();
            let producer = thread::spawn(move || {
                for part in payload.chunks(3000) {
                    writer.write_all(part).unwrap();
                }
            });

            // Demand arrives from this thread while readiness arrives on
            // the I/O thread.
            rec.request(2);
            loop {
                match rx.recv_timeout(WAIT).expect("stream stalled") {
                    Signal::Next(_) => {
                        assert!(sub.demand() >= 0);
                        rec.request(1);
                    }
                    Signal::Complete => break,
                    Signal::Error(e) => panic!("unexpected error: {}", e),
                }
            }
            producer.join().unwrap();

            assert_eq!(rec.overlaps(), 0);
            assert_eq!(rec.max_depth(), 1);
            assert_eq!(rec.bytes(), expected);
            assert_eq!(pool.in_use(), 0);
        }

        #[test]
        fn test_cancel_from_foreign_thread() {
            let el = EventLoop::start(EventLoopConfig::new()).unwrap();
            let io = el.handle();
            let (_writer, reader) = UnixStream::pair().unwrap();
            let pool = Arc::new(HeapBufferPool::with_buffer_capacity(64));
            let publisher = ChannelPublisher::new(
                Arc::new(FdChannelSource::new(OwnedFd::from(reader), io.clone())),
                pool.clone(),
                io.clone(),
            );
            let rec = Recorder::new();
            publisher.subscribe(rec.clone());

            rec.request(1);
            rec.cancel();

            // Both tasks ran once this marker does.
            let (tx, rx) = mpsc::channel();
            io.execute(Box::new(move || tx.send(()).unwrap())).unwrap();
            rx.recv_timeout(WAIT).unwrap();

            assert_eq!(pool.in_use(), 0);
            assert_eq!(io.listener_count(), 0);
            assert!(rec.signals().is_empty());
        }

        #[test]
        fn test_invalid_request_from_foreign_thread_during_drain() {
            let el = EventLoop::start(EventLoopConfig::new()).unwrap();
            let io = el.handle();
            let (mut writer, reader) = UnixStream::pair().unwrap();
            let pool = Arc::new(HeapBufferPool::with_buffer_capacity(512));
            let publisher = ChannelPublisher::new(
                Arc::new(FdChannelSource::new(OwnedFd::from(reader), io.clone())),
                pool.clone(),
                io.clone(),
            );
            let (tx, rx) = mpsc::channel();
            let rec = Recorder::notifying(tx);
            publisher.subscribe(rec.clone());

            let producer = thread::spawn(move || {
                let block = [0x5au8; 4096];
                for _ in 0..1024 {
                    if writer.write_all(&block).is_err() {
                        break;
                    }
                }
            });

            rec.request(UNBOUNDED);
            let mut requested = false;
            loop {
                match rx.recv_timeout(WAIT).expect("no terminal signal") {
                    Signal::Next(_) if !requested => {
                        rec.request(-1);
                        requested = true;
                    }
                    Signal::Next(_) => {}
                    _ => break,
                }
            }

            // Anything still queued for the subscription runs before this.
            let (done_tx, done_rx) = mpsc::channel();
            io.execute(Box::new(move || done_tx.send(()).unwrap())).unwrap();
            done_rx.recv_timeout(WAIT).unwrap();

            assert_eq!(rec.terminal_count(), 1);
            assert_eq!(rec.overlaps(), 0);
            assert_eq!(pool.in_use(), 0);
            assert_eq!(io.listener_count(), 0);
            producer.join().unwrap();
        }
    }
}
