//! `EventLoop` — default `IoExecutor` implementation (Linux, epoll).
//!
//! One dedicated thread owns an epoll instance and runs this loop:
//!
//! ```text
//! loop {
//!     1. Run up to task_budget queued tasks
//!     2. If shutdown requested → break
//!     3. epoll_wait (timeout 0 if tasks are still queued)
//!     4. For each event:
//!          wake token → drain the eventfd
//!          fd token   → invoke that fd's read listener
//! }
//! ```
//!
//! Foreign threads hand work over with `execute()`, which pushes onto a
//! lock-free queue and writes the eventfd. Descriptors are registered
//! `EPOLLONESHOT`: every readiness report disarms the fd until the owner
//! calls `arm()` again.

use byteflow_core::channel::ReadListener;
use byteflow_core::error::{FlowError, Result};
use byteflow_core::executor::{IoExecutor, Task};
use byteflow_core::{kdebug, kerror, kwarn};

use crossbeam_queue::SegQueue;
use nix::errno::Errno;

use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

use crate::config::EventLoopConfig;

/// epoll token reserved for the wake eventfd.
const WAKE_TOKEN: u64 = 0;

const READ_EVENTS: u32 = (libc::EPOLLIN | libc::EPOLLRDHUP | libc::EPOLLONESHOT) as u32;
const DISARMED_EVENTS: u32 = libc::EPOLLONESHOT as u32;

/// Shared side of an event loop: task queue, epoll registrations, wakeup.
///
/// Handed out as `Arc<IoHandle>`; this is what publishers hold as their
/// `IoExecutor`.
pub struct IoHandle {
    epfd: OwnedFd,
    wake_fd: OwnedFd,
    tasks: SegQueue<Task>,
    io_thread: OnceLock<ThreadId>,
    listeners: Mutex<HashMap<u64, ReadListener>>,
    next_token: AtomicU64,
    shutdown: AtomicBool,
    /// `execute()` calls between their shutdown check and their push.
    submitting: AtomicUsize,
}

fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    Errno::result(ret).map_err(io::Error::from)
}

impl IoHandle {
    fn new() -> io::Result<Self> {
        let epfd = cvt(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) })?;
        let epfd = unsafe { OwnedFd::from_raw_fd(epfd) };

        let wake_fd = cvt(unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) })?;
        let wake_fd = unsafe { OwnedFd::from_raw_fd(wake_fd) };

        let handle = Self {
            epfd,
            wake_fd,
            tasks: SegQueue::new(),
            io_thread: OnceLock::new(),
            listeners: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(WAKE_TOKEN + 1),
            shutdown: AtomicBool::new(false),
            submitting: AtomicUsize::new(0),
        };
        // Level-triggered: stays readable until drained.
        handle.ctl(
            libc::EPOLL_CTL_ADD,
            handle.wake_fd.as_raw_fd(),
            libc::EPOLLIN as u32,
            WAKE_TOKEN,
        )?;
        Ok(handle)
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32, token: u64) -> io::Result<()> {
        let mut ev = libc::epoll_event { events, u64: token };
        cvt(unsafe { libc::epoll_ctl(self.epfd.as_raw_fd(), op, fd, &mut ev) })?;
        Ok(())
    }

    /// Add `fd` to the epoll set, disarmed. Returns its token.
    ///
    /// Fails with `EPERM` for descriptors epoll cannot watch (regular
    /// files); callers treat those as always readable.
    pub fn register(&self, fd: RawFd) -> io::Result<u64> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.ctl(libc::EPOLL_CTL_ADD, fd, DISARMED_EVENTS, token)?;
        Ok(token)
    }

    /// Set the listener invoked (on the loop thread) when `token` fires.
    pub fn set_listener(&self, token: u64, listener: ReadListener) {
        self.lock_listeners().insert(token, listener);
    }

    /// Arm `fd` for one readable report.
    pub fn arm(&self, fd: RawFd, token: u64) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, READ_EVENTS, token)
    }

    /// Stop reporting readability for `fd`.
    pub fn disarm(&self, fd: RawFd, token: u64) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, DISARMED_EVENTS, token)
    }

    /// Remove `fd` from the epoll set and drop its listener.
    pub fn deregister(&self, fd: RawFd, token: u64) -> io::Result<()> {
        self.lock_listeners().remove(&token);
        let mut ev = libc::epoll_event { events: 0, u64: token };
        cvt(unsafe { libc::epoll_ctl(self.epfd.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, &mut ev) })?;
        Ok(())
    }

    /// Registered listeners (diagnostics).
    pub fn listener_count(&self) -> usize {
        self.lock_listeners().len()
    }

    /// Tasks queued and not yet run.
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, HashMap<u64, ReadListener>> {
        self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn listener(&self, token: u64) -> Option<ReadListener> {
        self.lock_listeners().get(&token).cloned()
    }

    fn wake(&self) -> io::Result<()> {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.wake_fd.as_raw_fd(),
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let errno = Errno::last();
            // Counter saturated: a wakeup is already pending.
            if errno == Errno::EAGAIN {
                return Ok(());
            }
            return Err(errno.into());
        }
        Ok(())
    }

    fn drain_wake(&self) {
        let mut val: u64 = 0;
        unsafe {
            libc::read(
                self.wake_fd.as_raw_fd(),
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            );
        }
    }

    /// Run up to `budget` queued tasks. Returns how many ran.
    fn run_tasks(&self, budget: usize) -> usize {
        let mut ran = 0;
        while ran < budget {
            let Some(task) = self.tasks.pop() else { break };
            run_guarded("task", task);
            ran += 1;
        }
        ran
    }
}

impl IoExecutor for IoHandle {
    fn in_io_thread(&self) -> bool {
        self.io_thread.get() == Some(&thread::current().id())
    }

    fn execute(&self, task: Task) -> Result<()> {
        // Pairs with the shutdown drain in `run()`: either this sees the
        // flag, or the drain waits for the push below.
        self.submitting.fetch_add(1, Ordering::SeqCst);
        if self.shutdown.load(Ordering::SeqCst) {
            self.submitting.fetch_sub(1, Ordering::SeqCst);
            return Err(FlowError::ExecutorUnavailable);
        }
        self.tasks.push(task);
        self.submitting.fetch_sub(1, Ordering::SeqCst);
        // The loop re-polls with timeout 0 while tasks are queued.
        if !self.in_io_thread() {
            self.wake()?;
        }
        Ok(())
    }
}

fn run_guarded(what: &str, f: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        kerror!("event loop: {} panicked", what);
    }
}

fn run(handle: Arc<IoHandle>, config: EventLoopConfig) {
    let mut events = vec![libc::epoll_event { events: 0, u64: 0 }; config.max_events.max(1)];
    let idle_timeout = config.poll_timeout.as_millis().min(i32::MAX as u128) as libc::c_int;

    kdebug!("event loop: started (max_events={}, budget={})", events.len(), config.task_budget);

    loop {
        // ── Step 1: Run queued tasks ──
        handle.run_tasks(config.task_budget);

        if handle.is_shutdown() {
            break;
        }

        // ── Step 2: Wait for readiness ──
        let timeout = if handle.tasks.is_empty() { idle_timeout } else { 0 };
        let n = unsafe {
            libc::epoll_wait(
                handle.epfd.as_raw_fd(),
                events.as_mut_ptr(),
                events.len() as libc::c_int,
                timeout,
            )
        };
        if n < 0 {
            let errno = Errno::last();
            if errno == Errno::EINTR {
                continue;
            }
            kerror!("event loop: epoll_wait failed: {}", errno);
            break;
        }

        // ── Step 3: Dispatch readiness ──
        for ev in &events[..n as usize] {
            let token = ev.u64;
            if token == WAKE_TOKEN {
                handle.drain_wake();
                continue;
            }
            match handle.listener(token) {
                Some(listener) => run_guarded("read listener", move || listener()),
                None => kwarn!("event loop: readiness for unknown token {}", token),
            }
        }
    }

    // Shutdown: run what was accepted before the flag was set.
    handle.shutdown.store(true, Ordering::SeqCst);
    loop {
        while handle.run_tasks(usize::MAX) > 0 {}
        if handle.submitting.load(Ordering::SeqCst) == 0 && handle.tasks.is_empty() {
            break;
        }
        thread::yield_now();
    }
    kdebug!("event loop: stopped");
}

/// Owner of the I/O thread. Dropping it shuts the loop down.
pub struct EventLoop {
    handle: Arc<IoHandle>,
    thread: Option<JoinHandle<()>>,
}

impl EventLoop {
    /// Spawn the I/O thread.
    pub fn start(config: EventLoopConfig) -> Result<Self> {
        let handle = Arc::new(IoHandle::new()?);
        let loop_handle = Arc::clone(&handle);
        let thread = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || run(loop_handle, config))?;
        let _ = handle.io_thread.set(thread.thread().id());
        Ok(Self { handle, thread: Some(thread) })
    }

    pub fn handle(&self) -> Arc<IoHandle> {
        Arc::clone(&self.handle)
    }

    /// Stop accepting tasks, run the ones already queued, join the thread.
    ///
    /// Called from the I/O thread itself this only sets the flag.
    pub fn shutdown(&mut self) {
        self.handle.shutdown.store(true, Ordering::SeqCst);
        if let Err(e) = self.handle.wake() {
            kwarn!("event loop: wake on shutdown failed: {}", e);
        }
        if let Some(thread) = self.thread.take() {
            if thread.thread().id() == thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                kerror!("event loop: I/O thread panicked");
            }
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}
