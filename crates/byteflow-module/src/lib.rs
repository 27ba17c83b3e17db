//! # byteflow-module — Default implementations
//!
//! This crate provides the default implementation for every byteflow
//! trait. Each impl prioritizes correctness and simplicity over raw speed.
//!
//! ## Default stack
//!
//! | Trait           | Default Impl     | Testing alternative |
//! |-----------------|------------------|---------------------|
//! | BufferPool      | HeapBufferPool   | —                   |
//! | IoExecutor      | EventLoop        | InlineExecutor      |
//! | SourceChannel   | FdChannel        | ScriptedChannel     |
//! | ChannelSource   | FdChannelSource  | ScriptedSource      |
//!
//! `EventLoop` and `FdChannel` are epoll-based and only built on Linux.

pub mod config;
pub mod heap_pool;
pub mod inline_executor;
pub mod scripted_channel;

pub use config::{EventLoopConfig, PoolConfig};
pub use heap_pool::HeapBufferPool;
pub use inline_executor::InlineExecutor;
pub use scripted_channel::{ScriptHandle, ScriptedChannel, ScriptedSource, Step};

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod event_loop;
        pub mod fd_channel;

        pub use event_loop::{EventLoop, IoHandle};
        pub use fd_channel::{FdChannel, FdChannelSource};
    }
}
