//! Error types for the byteflow publisher

use core::fmt;
use std::io;

/// Result type for byteflow operations
pub type Result<T> = std::result::Result<T, FlowError>;

/// Errors surfaced to subscribers through `on_error`, or returned by the
/// channel / executor layers before they are converted into signals.
#[derive(Debug)]
pub enum FlowError {
    /// `request(n)` with `n <= 0`
    InvalidDemand(i64),

    /// A second subscriber tried to attach to a single-subscriber publisher
    AlreadySubscribed,

    /// Read, close or readiness registration on the channel failed
    Io(io::Error),

    /// The channel source produced no channel although the body is not
    /// complete yet
    ChannelUnavailable,

    /// The buffer pool could not hand out a buffer
    PoolExhausted,

    /// The I/O executor refused the task (shut down)
    ExecutorUnavailable,
}

/// Coarse classification of a `FlowError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The consumer or caller broke the publisher/subscriber protocol
    ProtocolViolation,
    /// The channel layer failed
    ChannelIo,
    /// A supporting resource (pool, executor) was unavailable
    Resource,
}

impl FlowError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowError::InvalidDemand(_) | FlowError::AlreadySubscribed => {
                ErrorKind::ProtocolViolation
            }
            FlowError::Io(_) | FlowError::ChannelUnavailable => ErrorKind::ChannelIo,
            FlowError::PoolExhausted | FlowError::ExecutorUnavailable => ErrorKind::Resource,
        }
    }

    #[inline]
    pub fn is_protocol_violation(&self) -> bool {
        self.kind() == ErrorKind::ProtocolViolation
    }

    /// Returns the underlying I/O error, if any.
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            FlowError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowError::InvalidDemand(n) => {
                write!(f, "request must be positive, got {}", n)
            }
            FlowError::AlreadySubscribed => write!(f, "only one subscriber allowed"),
            FlowError::Io(e) => write!(f, "channel I/O error: {}", e),
            FlowError::ChannelUnavailable => write!(f, "failed to acquire channel"),
            FlowError::PoolExhausted => write!(f, "buffer pool exhausted"),
            FlowError::ExecutorUnavailable => write!(f, "I/O executor unavailable"),
        }
    }
}

impl std::error::Error for FlowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FlowError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FlowError {
    fn from(e: io::Error) -> Self {
        FlowError::Io(e)
    }
}
