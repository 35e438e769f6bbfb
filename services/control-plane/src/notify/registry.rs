//! Per-user subscription registry.
//!
//! Maps a username to the bounded delivery channels backing that user's
//! live-update streams. Registration happens on connection handlers while
//! the queue consumer broadcasts concurrently, so the map sits behind a
//! mutex; nothing awaits while holding it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info};

use vdesk_events::StateChangeEvent;

/// Default per-subscription buffer. A subscriber that falls this many
/// events behind is evicted at the next broadcast.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 5;

/// Identifies one registered subscription for explicit removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    tx: mpsc::Sender<StateChangeEvent>,
    created_at: DateTime<Utc>,
}

/// Registry of live subscriptions, keyed by username.
pub struct SubscriptionRegistry {
    capacity: usize,
    next_id: AtomicU64,
    buckets: Mutex<HashMap<String, Vec<Subscription>>>,
}

impl SubscriptionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_id: AtomicU64::new(1),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn buckets(&self) -> MutexGuard<'_, HashMap<String, Vec<Subscription>>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a bounded channel for `username` and attach it to the
    /// registry. The receiver belongs to the boundary adapter serving the
    /// connection; it must be released with [`unregister`] on disconnect.
    ///
    /// [`unregister`]: SubscriptionRegistry::unregister
    pub fn register(&self, username: &str) -> (SubscriptionId, mpsc::Receiver<StateChangeEvent>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        info!(username, subscription_id = id.0, "Registering event subscription");

        let mut buckets = self.buckets();
        buckets.entry(username.to_string()).or_default().push(Subscription {
            id,
            tx,
            created_at: Utc::now(),
        });
        (id, rx)
    }

    /// Deliver `event` to every live subscription for `username`.
    ///
    /// Sends never block: a full channel means the consumer on the other
    /// end is not draining, and that subscription is dropped instead of
    /// delivered to. Survivors are compacted in place. No-op when the
    /// username has no subscriptions. Returns the number of deliveries.
    pub fn broadcast(&self, username: &str, event: &StateChangeEvent) -> usize {
        let mut buckets = self.buckets();
        let Some(subscriptions) = buckets.get_mut(username) else {
            return 0;
        };

        let mut delivered = 0;
        subscriptions.retain(|sub| match sub.tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                info!(
                    username,
                    subscription_id = sub.id.0,
                    age_secs = (Utc::now() - sub.created_at).num_seconds(),
                    "Evicting subscription with full buffer"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(
                    username,
                    subscription_id = sub.id.0,
                    "Dropping subscription with closed channel"
                );
                false
            }
        });

        if subscriptions.is_empty() {
            buckets.remove(username);
        }
        delivered
    }

    /// Remove one subscription explicitly. Called when the owning
    /// connection closes; removing an already-evicted subscription is a
    /// no-op.
    pub fn unregister(&self, username: &str, id: SubscriptionId) {
        let mut buckets = self.buckets();
        if let Some(subscriptions) = buckets.get_mut(username) {
            subscriptions.retain(|sub| sub.id != id);
            if subscriptions.is_empty() {
                buckets.remove(username);
            }
        }
        debug!(username, subscription_id = id.0, "Unregistered event subscription");
    }

    /// Total live subscriptions across all users.
    pub fn active_subscriptions(&self) -> usize {
        self.buckets().values().map(Vec::len).sum()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(state: &str) -> StateChangeEvent {
        StateChangeEvent::new("d1", state, "i-123")
    }

    #[tokio::test]
    async fn broadcast_reaches_every_live_subscription_once() {
        let registry = SubscriptionRegistry::default();
        let (_id_a, mut rx_a) = registry.register("alice");
        let (_id_b, mut rx_b) = registry.register("alice");

        let delivered = registry.broadcast("alice", &event("running"));
        assert_eq!(delivered, 2);
        assert_eq!(rx_a.recv().await.unwrap().state, "running");
        assert_eq!(rx_b.recv().await.unwrap().state, "running");
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn broadcast_without_subscribers_is_a_noop() {
        let registry = SubscriptionRegistry::default();
        assert_eq!(registry.broadcast("nobody", &event("running")), 0);
    }

    #[tokio::test]
    async fn full_subscription_is_evicted_and_siblings_still_receive() {
        let registry = SubscriptionRegistry::default();
        let (_slow_id, mut slow_rx) = registry.register("alice");
        let (_live_id, mut live_rx) = registry.register("alice");

        // Fill the slow subscriber to capacity without draining it.
        for n in 0..DEFAULT_SUBSCRIBER_CAPACITY {
            registry.broadcast("alice", &event(&format!("state-{n}")));
        }
        assert_eq!(registry.active_subscriptions(), 2);

        // The sixth broadcast overflows the slow subscriber.
        let delivered = registry.broadcast("alice", &event("overflow"));
        assert_eq!(delivered, 0, "live subscriber is also full here");

        // Drain the live subscriber and confirm the slow one is gone.
        for _ in 0..DEFAULT_SUBSCRIBER_CAPACITY {
            live_rx.recv().await.unwrap();
        }
        assert_eq!(registry.active_subscriptions(), 0);
        drop(slow_rx);
        drop(live_rx);
    }

    #[tokio::test]
    async fn eviction_spares_a_draining_sibling() {
        let registry = SubscriptionRegistry::default();
        let (_slow_id, slow_rx) = registry.register("alice");
        let (_live_id, mut live_rx) = registry.register("alice");

        for n in 0..DEFAULT_SUBSCRIBER_CAPACITY {
            registry.broadcast("alice", &event(&format!("state-{n}")));
            live_rx.recv().await.unwrap();
        }

        // Slow subscriber is at capacity, live one is empty.
        let delivered = registry.broadcast("alice", &event("overflow"));
        assert_eq!(delivered, 1);
        assert_eq!(live_rx.recv().await.unwrap().state, "overflow");
        assert_eq!(registry.active_subscriptions(), 1);
        drop(slow_rx);
    }

    #[test]
    fn unregister_removes_only_the_named_subscription() {
        let registry = SubscriptionRegistry::default();
        let (id_a, _rx_a) = registry.register("alice");
        let (_id_b, _rx_b) = registry.register("alice");

        registry.unregister("alice", id_a);
        assert_eq!(registry.active_subscriptions(), 1);

        // Unknown ids are a no-op.
        registry.unregister("alice", id_a);
        assert_eq!(registry.active_subscriptions(), 1);
    }

    #[test]
    fn closed_channels_are_dropped_on_broadcast() {
        let registry = SubscriptionRegistry::default();
        let (_id, rx) = registry.register("alice");
        drop(rx);

        assert_eq!(registry.broadcast("alice", &event("running")), 0);
        assert_eq!(registry.active_subscriptions(), 0);
    }
}
