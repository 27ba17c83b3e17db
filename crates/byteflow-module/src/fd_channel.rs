//! `FdChannel` — default `SourceChannel` implementation (Linux).
//!
//! Reads a non-blocking file descriptor (pipe, socket, tty) and reports
//! readiness through an `EventLoop`. Regular files cannot be polled;
//! they are treated as always readable, so `resume_reads()` just queues
//! the listener on the loop.

use byteflow_core::buffer::PooledBuffer;
use byteflow_core::channel::{ChannelSource, ReadListener, ReadStatus, SourceChannel};
use byteflow_core::error::{FlowError, Result};
use byteflow_core::executor::IoExecutor;
use byteflow_core::{kdebug, ktrace};

use nix::errno::Errno;

use std::fs::File;
use std::io;
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::sync::{Arc, Mutex};

use crate::event_loop::IoHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    /// Registered with epoll under this token.
    Polled(u64),
    /// Not pollable; every resume reports ready.
    AlwaysReady,
}

pub struct FdChannel {
    fd: Option<OwnedFd>,
    io: Arc<IoHandle>,
    readiness: Readiness,
    listener: Option<ReadListener>,
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = Errno::result(unsafe { libc::fcntl(fd, libc::F_GETFL) })?;
    if flags & libc::O_NONBLOCK == 0 {
        Errno::result(unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) })?;
    }
    Ok(())
}

impl FdChannel {
    /// Take ownership of `fd`, switch it to non-blocking mode and register
    /// it with the loop behind `io`.
    pub fn new(fd: OwnedFd, io: Arc<IoHandle>) -> io::Result<Self> {
        let raw = fd.as_raw_fd();
        set_nonblocking(raw)?;
        let readiness = match io.register(raw) {
            Ok(token) => Readiness::Polled(token),
            Err(e) if e.raw_os_error() == Some(libc::EPERM) => {
                kdebug!("fd_channel: fd {} not pollable, treating as always ready", raw);
                Readiness::AlwaysReady
            }
            Err(e) => return Err(e),
        };
        Ok(Self { fd: Some(fd), io, readiness, listener: None })
    }

    /// True for descriptors epoll could not watch.
    pub fn is_always_ready(&self) -> bool {
        self.readiness == Readiness::AlwaysReady
    }

    pub fn is_closed(&self) -> bool {
        self.fd.is_none()
    }

    fn raw(&self) -> io::Result<RawFd> {
        self.fd
            .as_ref()
            .map(|fd| fd.as_raw_fd())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "channel closed"))
    }
}

impl SourceChannel for FdChannel {
    fn read(&mut self, buffer: &mut PooledBuffer) -> io::Result<ReadStatus> {
        let fd = self.raw()?;
        let (ptr, len) = {
            let spare = buffer.spare_mut();
            (spare.as_mut_ptr(), spare.len())
        };
        if len == 0 {
            // A zero-length read would look like end of stream.
            return Ok(ReadStatus::WouldBlock);
        }
        loop {
            let ret = unsafe { libc::read(fd, ptr as *mut libc::c_void, len) };
            if ret > 0 {
                let n = ret as usize;
                buffer.advance(n);
                ktrace!("fd_channel: fd {} read {} bytes", fd, n);
                return Ok(ReadStatus::Data(n));
            }
            if ret == 0 {
                return Ok(ReadStatus::Eof);
            }
            match Errno::last() {
                Errno::EINTR => continue,
                Errno::EAGAIN => return Ok(ReadStatus::WouldBlock),
                errno => return Err(errno.into()),
            }
        }
    }

    fn set_read_listener(&mut self, listener: ReadListener) -> io::Result<()> {
        if let Readiness::Polled(token) = self.readiness {
            self.io.set_listener(token, Arc::clone(&listener));
        }
        self.listener = Some(listener);
        Ok(())
    }

    fn suspend_reads(&mut self) -> io::Result<()> {
        let fd = self.raw()?;
        match self.readiness {
            Readiness::Polled(token) => self.io.disarm(fd, token),
            Readiness::AlwaysReady => Ok(()),
        }
    }

    fn resume_reads(&mut self) -> io::Result<()> {
        let fd = self.raw()?;
        match self.readiness {
            Readiness::Polled(token) => self.io.arm(fd, token),
            Readiness::AlwaysReady => {
                let Some(listener) = self.listener.clone() else {
                    return Ok(());
                };
                self.io
                    .execute(Box::new(move || listener()))
                    .map_err(io::Error::other)
            }
        }
    }

    fn close(&mut self) -> io::Result<()> {
        self.listener = None;
        let Some(fd) = self.fd.take() else {
            return Ok(());
        };
        let result = match self.readiness {
            Readiness::Polled(token) => self.io.deregister(fd.as_raw_fd(), token),
            Readiness::AlwaysReady => Ok(()),
        };
        drop(fd);
        result
    }
}

impl Drop for FdChannel {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// `ChannelSource` for a single descriptor.
///
/// The first `open_channel()` wraps the descriptor; after that the body
/// counts as consumed and opens yield `Ok(None)`.
pub struct FdChannelSource {
    fd: Mutex<Option<OwnedFd>>,
    io: Arc<IoHandle>,
}

impl FdChannelSource {
    pub fn new(fd: OwnedFd, io: Arc<IoHandle>) -> Self {
        Self { fd: Mutex::new(Some(fd)), io }
    }

    pub fn from_file(file: File, io: Arc<IoHandle>) -> Self {
        Self::new(OwnedFd::from(file), io)
    }

    /// Source over a duplicate of standard input.
    pub fn stdin(io: Arc<IoHandle>) -> io::Result<Self> {
        let fd = io::stdin().as_fd().try_clone_to_owned()?;
        Ok(Self::new(fd, io))
    }
}

impl ChannelSource for FdChannelSource {
    fn open_channel(&self) -> Result<Option<Box<dyn SourceChannel>>> {
        let fd = self
            .fd
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match fd {
            None => Ok(None),
            Some(fd) => {
                let channel = FdChannel::new(fd, Arc::clone(&self.io)).map_err(FlowError::Io)?;
                Ok(Some(Box::new(channel)))
            }
        }
    }
}
