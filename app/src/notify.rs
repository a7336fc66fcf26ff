//! Fan-out of balance updates to live subscribers. Delivery is best effort: publishing never
//! waits, and a subscriber that cannot keep up or has gone away is dropped.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub u64);

/// The receiving end handed to a subscriber.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub events: mpsc::Receiver<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Broadcaster {
    subscribers: Arc<DashMap<SubscriberId, mpsc::Sender<String>>>,
    next_id: Arc<AtomicU64>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// `capacity` is how many undelivered events the subscriber may fall behind by before it is
    /// dropped.
    pub fn subscribe(&self, capacity: usize) -> Subscription {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, events) = mpsc::channel(capacity.max(1));
        self.subscribers.insert(id, sender);
        log::info!("subscriber {} added", id.0);
        Subscription { id, events }
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            log::info!("subscriber {} removed", id.0);
        }
        removed
    }

    /// Sends the event to every subscriber without waiting. Returns how many received it.
    pub fn publish(&self, event: &str) -> usize {
        let mut dropped = Vec::new();
        let mut delivered = 0;
        for entry in self.subscribers.iter() {
            match entry.value().try_send(event.to_owned()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    log::warn!("subscriber {} is not keeping up, dropping it", entry.key().0);
                    dropped.push(*entry.key());
                }
                Err(TrySendError::Closed(_)) => dropped.push(*entry.key()),
            }
        }
        // Removing while iterating would deadlock on the shard lock.
        for id in dropped {
            self.unsubscribe(id);
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
