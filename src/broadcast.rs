//! Live event fan-out
//!
//! Every classified and persisted event is pushed synchronously to the
//! registered subscribers in registration order; a subscriber that panics is
//! isolated and never affects later subscribers or ingestion. Delivery is
//! best-effort with no buffering or replay. A lossy broadcast channel carries
//! the same events to async consumers such as the dashboard feed.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::warn;

use crate::models::AttackEvent;

type Handler = Box<dyn Fn(&AttackEvent) + Send + Sync>;

/// Token returned by `subscribe`, used to detach the handler again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberId(u64);

pub struct EventBroadcast {
    subscribers: RwLock<Vec<(u64, Handler)>>,
    next_id: AtomicU64,
    channel: broadcast::Sender<AttackEvent>,
}

impl EventBroadcast {
    pub fn new(channel_capacity: usize) -> Self {
        let (channel, _) = broadcast::channel(channel_capacity);
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            channel,
        }
    }

    /// Attach a handler; it receives every event emitted from now on
    pub fn subscribe<F>(&self, handler: F) -> SubscriberId
    where
        F: Fn(&AttackEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().push((id, Box::new(handler)));
        SubscriberId(id)
    }

    /// Detach a handler; returns false if it was already gone
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sub_id, _)| *sub_id != id.0);
        subscribers.len() != before
    }

    /// Lossy channel for async consumers; slow receivers miss events
    pub fn watch(&self) -> broadcast::Receiver<AttackEvent> {
        self.channel.subscribe()
    }

    /// Push one event to every current subscriber, in registration order
    pub fn emit(&self, event: &AttackEvent) {
        let subscribers = self.subscribers.read();
        for (id, handler) in subscribers.iter() {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!("Event subscriber {} panicked; continuing", id);
            }
        }
        drop(subscribers);

        // No receivers is the common case and not an error.
        let _ = self.channel.send(event.clone());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for EventBroadcast {
    fn default() -> Self {
        Self::new(1024)
    }
}
