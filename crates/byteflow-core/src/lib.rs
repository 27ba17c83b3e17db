//! # byteflow-core — Contracts for the byteflow publisher
//!
//! This crate defines the trait boundaries between a non-blocking byte
//! source and a demand-driven consumer. Every axis of variability is one
//! trait: where bytes come from (`SourceChannel`, `ChannelSource`), where
//! buffers come from (`BufferPool`), and where work runs (`IoExecutor`).
//! Default implementations live in `byteflow-module`; the publisher that
//! ties them together lives in `byteflow-publisher`.
//!
//! ## Modules
//!
//! - `flow` - Publisher / Subscriber / Subscription protocol traits
//! - `chunk` - Borrowed view handed to `on_next`
//! - `demand` - Lock-free outstanding-demand counter
//! - `buffer` - Pooled byte buffer and the pool trait
//! - `channel` - Non-blocking source channel abstraction
//! - `executor` - I/O context executor trait
//! - `cell` - Non-blocking exclusive-access cell
//! - `error` - Error types
//! - `kprint` - Kernel-style debug printing macros
//! - `env` - Environment variable utilities

pub mod flow;
pub mod chunk;
pub mod demand;
pub mod buffer;
pub mod channel;
pub mod executor;
pub mod cell;
pub mod error;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use flow::{EmptySubscription, Publisher, Subscriber, Subscription};
pub use chunk::Chunk;
pub use demand::{Demand, UNBOUNDED};
pub use buffer::{BufferPool, PooledBuffer};
pub use channel::{ChannelSource, ReadListener, ReadStatus, SourceChannel};
pub use executor::{IoExecutor, Task};
pub use cell::{ExclusiveCell, ExclusiveGuard};
pub use error::{ErrorKind, FlowError, Result};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};
