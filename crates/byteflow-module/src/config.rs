//! byteflow configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder setters (programmatic)
//! 2. Environment variables, applied by `from_env()`
//! 3. Library defaults (`defaults` below)
//!
//! # Example
//!
//! ```rust,ignore
//! use byteflow_module::config::{EventLoopConfig, PoolConfig};
//!
//! let pool = PoolConfig::from_env().buffer_capacity(16 * 1024);
//! let io = EventLoopConfig::from_env().thread_name("body-io");
//! ```

use std::time::Duration;

use byteflow_core::env::{env_get, env_get_str};

/// Library defaults.
pub mod defaults {
    /// Bytes per pooled buffer (8 KiB).
    pub const BUFFER_CAPACITY: usize = 8192;
    /// Released buffers kept for reuse.
    pub const MAX_POOLED: usize = 64;
    /// Buffers allowed out at once; 0 means no limit.
    pub const MAX_OUTSTANDING: usize = 0;
    /// epoll events drained per `epoll_wait`.
    pub const MAX_EVENTS: usize = 64;
    /// `epoll_wait` timeout when no task is queued.
    pub const POLL_TIMEOUT_MS: u64 = 50;
    /// Tasks run per loop turn before polling for readiness again.
    pub const TASK_BUDGET: usize = 256;
    /// Name of the I/O thread.
    pub const THREAD_NAME: &str = "byteflow-io";
}

/// Buffer pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Capacity of every buffer the pool hands out
    pub buffer_capacity: usize,
    /// Released buffers kept on the free list
    pub max_pooled: usize,
    /// Upper bound on buffers handed out at once (0 = unbounded)
    pub max_outstanding: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl PoolConfig {
    /// Defaults with environment overrides.
    ///
    /// - `FLOW_BUFFER_CAPACITY` - bytes per buffer
    /// - `FLOW_MAX_POOLED` - free-list size
    /// - `FLOW_MAX_OUTSTANDING` - buffers out at once (0 = unbounded)
    pub fn from_env() -> Self {
        Self {
            buffer_capacity: env_get("FLOW_BUFFER_CAPACITY", defaults::BUFFER_CAPACITY),
            max_pooled: env_get("FLOW_MAX_POOLED", defaults::MAX_POOLED),
            max_outstanding: env_get("FLOW_MAX_OUTSTANDING", defaults::MAX_OUTSTANDING),
        }
    }

    /// Pure library defaults, no environment lookup.
    pub fn new() -> Self {
        Self {
            buffer_capacity: defaults::BUFFER_CAPACITY,
            max_pooled: defaults::MAX_POOLED,
            max_outstanding: defaults::MAX_OUTSTANDING,
        }
    }

    pub fn buffer_capacity(mut self, n: usize) -> Self {
        self.buffer_capacity = n.max(1);
        self
    }

    pub fn max_pooled(mut self, n: usize) -> Self {
        self.max_pooled = n;
        self
    }

    pub fn max_outstanding(mut self, n: usize) -> Self {
        self.max_outstanding = n;
        self
    }
}

/// Event loop configuration.
#[derive(Debug, Clone)]
pub struct EventLoopConfig {
    /// epoll events drained per wait
    pub max_events: usize,
    /// Wait timeout while idle
    pub poll_timeout: Duration,
    /// Tasks run per turn
    pub task_budget: usize,
    /// I/O thread name
    pub thread_name: String,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl EventLoopConfig {
    /// Defaults with environment overrides.
    ///
    /// - `FLOW_MAX_EVENTS` - events per `epoll_wait`
    /// - `FLOW_POLL_TIMEOUT_MS` - idle wait timeout
    /// - `FLOW_TASK_BUDGET` - tasks per turn
    /// - `FLOW_IO_THREAD_NAME` - I/O thread name
    pub fn from_env() -> Self {
        Self {
            max_events: env_get("FLOW_MAX_EVENTS", defaults::MAX_EVENTS),
            poll_timeout: Duration::from_millis(env_get(
                "FLOW_POLL_TIMEOUT_MS",
                defaults::POLL_TIMEOUT_MS,
            )),
            task_budget: env_get("FLOW_TASK_BUDGET", defaults::TASK_BUDGET),
            thread_name: env_get_str("FLOW_IO_THREAD_NAME", defaults::THREAD_NAME),
        }
    }

    pub fn new() -> Self {
        Self {
            max_events: defaults::MAX_EVENTS,
            poll_timeout: Duration::from_millis(defaults::POLL_TIMEOUT_MS),
            task_budget: defaults::TASK_BUDGET,
            thread_name: defaults::THREAD_NAME.to_string(),
        }
    }

    pub fn max_events(mut self, n: usize) -> Self {
        self.max_events = n.max(1);
        self
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn task_budget(mut self, n: usize) -> Self {
        self.task_budget = n.max(1);
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}
