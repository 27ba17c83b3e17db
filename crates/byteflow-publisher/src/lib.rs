//! # byteflow-publisher — Demand-driven channel publisher
//!
//! Bridges a non-blocking `SourceChannel` to a backpressure-aware
//! `Subscriber`:
//!
//! ```text
//! request(n) ─► Demand += n ─► Dispatcher ─► drain loop ─► channel.read(buffer)
//!                                                  │
//!                      full buffer / EOF ◄─────────┘
//!                            │
//!                            ▼
//!                   on_next(chunk), Demand -= 1
//! ```
//!
//! The drain loop only runs on the executor's I/O thread, one pass at a
//! time per subscription. Reads never block: a would-block read parks the
//! subscription until the channel reports readiness.
//!
//! ## Example
//!
//! ```rust,ignore
//! use byteflow_module::{EventLoop, EventLoopConfig, FdChannelSource, HeapBufferPool, PoolConfig};
//! use byteflow_publisher::ChannelPublisher;
//!
//! let event_loop = EventLoop::start(EventLoopConfig::from_env())?;
//! let io = event_loop.handle();
//! let publisher = ChannelPublisher::new(
//!     Arc::new(FdChannelSource::stdin(io.clone())?),
//!     Arc::new(HeapBufferPool::new(&PoolConfig::from_env())),
//!     io,
//! );
//! publisher.subscribe(my_subscriber);
//! ```

pub mod dispatcher;
pub mod publisher;
pub mod subscription;

#[cfg(test)]
mod test_support;

pub use dispatcher::Dispatcher;
pub use publisher::ChannelPublisher;
pub use subscription::{ChannelSubscription, SubscriptionState};
