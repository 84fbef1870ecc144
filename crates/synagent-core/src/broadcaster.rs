//! In-process pub/sub for [`TestResult`]s.
//!
//! Publishers never block on a slow subscriber: each subscriber owns a
//! bounded channel and a drop counter, and a full channel simply drops the
//! message for that subscriber. This is deliberately hand-rolled rather than
//! built on `tokio::sync::broadcast`, whose single shared-lag counter cannot
//! express independent per-subscriber drop accounting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, trace};

use crate::model::TestResult;

/// Opaque handle returned by [`Broadcaster::subscribe`], used to unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

struct Subscriber {
    sender: mpsc::Sender<Arc<TestResult>>,
    dropped: Arc<AtomicU64>,
}

/// Single-publisher, multi-subscriber fan-out for test results.
#[derive(Clone)]
pub struct Broadcaster {
    subscribers: Arc<RwLock<HashMap<SubscriberId, Subscriber>>>,
    next_id: Arc<AtomicU64>,
    buffer: usize,
}

impl Broadcaster {
    /// Creates a broadcaster whose per-subscriber channels hold up to `buffer` messages.
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
            buffer: buffer.max(1),
        }
    }

    /// Registers a new subscriber and returns its handle plus a receiver for
    /// results published after this call.
    pub async fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<Arc<TestResult>>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().await.insert(
            id,
            Subscriber {
                sender: tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
        );
        debug!(subscriber = id.0, "broadcaster subscribed");
        (id, rx)
    }

    /// Removes a subscriber; further publishes are no longer delivered to it.
    pub async fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.write().await.remove(&id);
        debug!(subscriber = id.0, "broadcaster unsubscribed");
    }

    /// Returns the number of messages dropped for a given subscriber, or
    /// `None` if it is no longer registered.
    pub async fn dropped_count(&self, id: SubscriberId) -> Option<u64> {
        self.subscribers
            .read()
            .await
            .get(&id)
            .map(|s| s.dropped.load(Ordering::Relaxed))
    }

    /// Publishes a result to every current subscriber. Never blocks: a
    /// subscriber whose channel is full simply has this message dropped and
    /// its drop counter incremented.
    pub async fn publish(&self, result: TestResult) {
        let result = Arc::new(result);
        let subscribers = self.subscribers.read().await;
        for (id, sub) in subscribers.iter() {
            match sub.sender.try_send(Arc::clone(&result)) {
                Ok(()) => trace!(subscriber = id.0, "delivered result"),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    sub.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(subscriber = id.0, "subscriber buffer full, dropping result");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    trace!(subscriber = id.0, "subscriber channel closed");
                }
            }
        }
    }

    /// Number of currently registered subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Drops all subscribers. Idempotent; outstanding messages already queued
    /// in subscriber channels are left to drain on a best-effort basis by the
    /// receivers themselves.
    pub async fn stop(&self) {
        self.subscribers.write().await.clear();
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Outcome, PluginId};
    use std::time::SystemTime;

    fn sample_result() -> TestResult {
        TestResult {
            plugin_id: PluginId::new("agent-1", "ping"),
            timestamp: SystemTime::now(),
            outcome: Outcome::Pass,
            details: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_result() {
        let bus = Broadcaster::new(4);
        let (_id, mut rx) = bus.subscribe().await;
        bus.publish(sample_result()).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.plugin_id.as_str(), "agent-1/ping");
    }

    #[tokio::test]
    async fn full_subscriber_drops_without_blocking_publisher() {
        let bus = Broadcaster::new(1);
        let (id, _rx) = bus.subscribe().await;

        bus.publish(sample_result()).await;
        bus.publish(sample_result()).await;
        bus.publish(sample_result()).await;

        assert_eq!(bus.dropped_count(id).await, Some(2));
    }

    #[tokio::test]
    async fn unsubscribed_subscriber_gets_nothing() {
        let bus = Broadcaster::new(4);
        let (id, mut rx) = bus.subscribe().await;
        bus.unsubscribe(id).await;
        bus.publish(sample_result()).await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn late_subscriber_does_not_see_earlier_messages() {
        let bus = Broadcaster::new(4);
        bus.publish(sample_result()).await;
        let (_id, mut rx) = bus.subscribe().await;
        bus.publish(sample_result()).await;
        assert!(rx.try_recv().is_ok());
    }
}
