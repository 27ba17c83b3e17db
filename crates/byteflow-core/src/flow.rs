//! Publisher / subscriber protocol.
//!
//! One `subscribe`, one `on_subscribe`, request-driven `on_next*`, then at
//! most one terminal `on_complete` or `on_error`.
//!
//! **Contract:**
//! - Signals to one subscriber are serial: never concurrent, never
//!   nested inside each other.
//! - `on_next` is only called while outstanding demand is positive.
//! - `request(n)` with `n <= 0` terminates the subscription with
//!   `on_error(InvalidDemand)`.
//! - `cancel()` is idempotent and silent.
//! - Any call after the terminal signal is a no-op.

use std::sync::Arc;

use crate::chunk::Chunk;
use crate::error::FlowError;

/// Receives byte chunks from a `Publisher`.
///
/// Callbacks run on the publisher's I/O context, so implementations must
/// be `Send + Sync` and should return quickly.
pub trait Subscriber: Send + Sync {
    /// First signal, carrying the handle used to request and cancel.
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>);

    /// One chunk. The view is only valid for the duration of the call.
    fn on_next(&self, chunk: Chunk<'_>);

    /// Terminal failure.
    fn on_error(&self, error: FlowError);

    /// Terminal success.
    fn on_complete(&self);
}

/// Handle linking one subscriber to one publisher.
pub trait Subscription: Send + Sync {
    /// Ask for `n` more chunks. Must never block the caller.
    fn request(&self, n: i64);

    /// Stop the stream and release its resources. No terminal signal.
    fn cancel(&self);
}

/// Source of byte chunks.
pub trait Publisher {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber>);
}

/// Subscription that ignores every call.
///
/// Handed to subscribers that are rejected immediately, so that
/// `on_subscribe` still precedes their `on_error`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptySubscription;

impl Subscription for EmptySubscription {
    fn request(&self, _n: i64) {}

    fn cancel(&self) {}
}
