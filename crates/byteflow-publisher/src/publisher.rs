//! `ChannelPublisher` — single-subscriber entry point.

use byteflow_core::buffer::BufferPool;
use byteflow_core::channel::ChannelSource;
use byteflow_core::error::FlowError;
use byteflow_core::executor::IoExecutor;
use byteflow_core::flow::{EmptySubscription, Publisher, Subscriber, Subscription};
use byteflow_core::{kdebug, kwarn};

use std::sync::{Arc, OnceLock};

use crate::subscription::ChannelSubscription;

/// Publishes the bytes of one channel to exactly one subscriber.
///
/// The channel is not opened until the subscriber first requests data.
pub struct ChannelPublisher {
    source: Arc<dyn ChannelSource>,
    pool: Arc<dyn BufferPool>,
    executor: Arc<dyn IoExecutor>,
    subscription: OnceLock<Arc<ChannelSubscription>>,
}

impl ChannelPublisher {
    pub fn new(
        source: Arc<dyn ChannelSource>,
        pool: Arc<dyn BufferPool>,
        executor: Arc<dyn IoExecutor>,
    ) -> Self {
        Self {
            source,
            pool,
            executor,
            subscription: OnceLock::new(),
        }
    }

    /// The live subscription, once someone subscribed.
    pub fn subscription(&self) -> Option<Arc<ChannelSubscription>> {
        self.subscription.get().cloned()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.get().is_some()
    }
}

impl Publisher for ChannelPublisher {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
        let mut created = false;
        let subscription = self.subscription.get_or_init(|| {
            created = true;
            ChannelSubscription::new(
                Arc::clone(&subscriber),
                Arc::clone(&self.source),
                Arc::clone(&self.pool),
                Arc::clone(&self.executor),
            )
        });

        if !created {
            kwarn!("publisher: rejecting second subscriber");
            subscriber.on_subscribe(Arc::new(EmptySubscription));
            subscriber.on_error(FlowError::AlreadySubscribed);
            return;
        }
        kdebug!("publisher: subscribed");
        let subscription: Arc<dyn Subscription> = subscription.clone();
        subscriber.on_subscribe(subscription);
    }
}
