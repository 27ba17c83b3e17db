//! Non-blocking source channel abstraction.
//!
//! A `SourceChannel` is the read side of some transport that can report
//! readiness asynchronously. The publisher never blocks on it: a read
//! either returns data, reports that it would block, or reports
//! end-of-stream.
//!
//! # Implementors
//!
//! - `FdChannel` (default): a non-blocking file descriptor (pipe, socket)
//!   armed on an `EventLoop` with `EPOLLONESHOT`.
//! - `ScriptedChannel` (testing): replays a fixed sequence of reads and
//!   lets the test fire readiness by hand.

use std::io;
use std::sync::Arc;

use crate::buffer::PooledBuffer;
use crate::error::Result;

/// Outcome of one non-blocking read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// `n > 0` bytes were appended to the buffer.
    Data(usize),
    /// Nothing available right now.
    WouldBlock,
    /// The stream has ended.
    Eof,
}

impl ReadStatus {
    /// Decode the `>0 bytes / 0 would-block / -1 end-of-stream` convention.
    ///
    /// Any other negative value is treated as end-of-stream.
    #[inline]
    pub fn from_raw(ret: i64) -> Self {
        match ret {
            0 => ReadStatus::WouldBlock,
            n if n > 0 => ReadStatus::Data(n as usize),
            _ => ReadStatus::Eof,
        }
    }

    /// Encode back into the raw convention.
    #[inline]
    pub fn to_raw(self) -> i64 {
        match self {
            ReadStatus::Data(n) => n as i64,
            ReadStatus::WouldBlock => 0,
            ReadStatus::Eof => -1,
        }
    }
}

/// Callback invoked on the I/O context when the channel becomes readable.
pub type ReadListener = Arc<dyn Fn() + Send + Sync>;

/// The read side of a non-blocking transport.
///
/// **Contract:**
/// - `read()` never blocks. It reads into `buffer.spare_mut()` and
///   advances the buffer by the number of bytes read.
/// - After `resume_reads()`, the listener fires (once) when the channel
///   becomes readable or reaches end-of-stream.
/// - After `suspend_reads()`, the listener does not fire.
/// - `close()` is idempotent.
pub trait SourceChannel: Send {
    /// Read as many bytes as are available and fit.
    fn read(&mut self, buffer: &mut PooledBuffer) -> io::Result<ReadStatus>;

    /// Install the readiness listener, replacing any previous one.
    fn set_read_listener(&mut self, listener: ReadListener) -> io::Result<()>;

    /// Stop readiness notifications.
    fn suspend_reads(&mut self) -> io::Result<()>;

    /// Arm readiness notifications.
    fn resume_reads(&mut self) -> io::Result<()>;

    /// Release the underlying transport.
    fn close(&mut self) -> io::Result<()>;
}

/// Lazily produces the channel a publisher reads from.
///
/// Mirrors a request exchange: the channel is only acquired on the first
/// drain, and may already be gone if the body was fully consumed.
pub trait ChannelSource: Send + Sync {
    /// - `Ok(Some(channel))`: read from this channel.
    /// - `Ok(None)`: the body is already complete; nothing to read.
    /// - `Err(_)`: the channel could not be acquired.
    fn open_channel(&self) -> Result<Option<Box<dyn SourceChannel>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_convention() {
        assert_eq!(ReadStatus::from_raw(5), ReadStatus::Data(5));
        assert_eq!(ReadStatus::from_raw(0), ReadStatus::WouldBlock);
        assert_eq!(ReadStatus::from_raw(-1), ReadStatus::Eof);

        assert_eq!(ReadStatus::Data(7).to_raw(), 7);
        assert_eq!(ReadStatus::WouldBlock.to_raw(), 0);
        assert_eq!(ReadStatus::Eof.to_raw(), -1);
    }
}
