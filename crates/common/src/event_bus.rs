use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Topic(pub &'static str);

/// Subscribing to this topic yields every event published on the bus.
pub const WILDCARD: Topic = Topic("*");

#[derive(Debug, Clone)]
pub struct EventEnvelope<T: Clone + Send + Sync + Debug + 'static> {
    /// Shared by every copy of one published event
    pub id: Uuid,
    pub topic: Topic,
    pub payload: T,
    pub ts_ms: u128,
}

/// Topic-keyed broadcast bus.
///
/// Publishing never blocks and never waits for subscribers: the envelope is
/// handed to the topic channel (and the wildcard channel) before `publish`
/// returns, so observers see events in the order the state changes happened.
#[derive(Clone)]
pub struct EventBus<T: Clone + Send + Sync + Debug + 'static> {
    inner: Arc<RwLock<Inner<T>>>,
    subscribe_buffer: usize,
}

struct Inner<T: Clone + Send + Sync + Debug + 'static> {
    topics: HashMap<&'static str, broadcast::Sender<EventEnvelope<T>>>,
}

impl<T: Clone + Send + Sync + Debug + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl<T: Clone + Send + Sync + Debug + 'static> EventBus<T> {
    pub fn new(subscribe_buffer: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                topics: HashMap::new(),
            })),
            subscribe_buffer: subscribe_buffer.max(1),
        }
    }

    fn sender(&self, topic: Topic) -> broadcast::Sender<EventEnvelope<T>> {
        if let Some(tx) = self.inner.read().topics.get(topic.0) {
            return tx.clone();
        }
        let mut inner = self.inner.write();
        inner
            .topics
            .entry(topic.0)
            .or_insert_with(|| {
                info!(target: "event_bus", topic = topic.0, "created topic");
                broadcast::channel(self.subscribe_buffer).0
            })
            .clone()
    }

    /// Publish a payload and return how many receivers got it.
    pub fn publish(&self, topic: Topic, payload: T) -> usize {
        let envelope = EventEnvelope {
            id: Uuid::new_v4(),
            topic,
            payload,
            ts_ms: current_ts_ms(),
        };

        let mut delivered = 0;
        if topic != WILDCARD {
            if let Some(tx) = self.existing_sender(topic) {
                delivered += tx.send(envelope.clone()).unwrap_or(0);
            }
        }
        if let Some(tx) = self.existing_sender(WILDCARD) {
            delivered += tx.send(envelope).unwrap_or(0);
        }

        if delivered == 0 {
            trace!(target: "event_bus", topic = topic.0, "no subscribers");
        } else {
            debug!(target: "event_bus", topic = topic.0, receivers = delivered, "published");
        }
        delivered
    }

    fn existing_sender(&self, topic: Topic) -> Option<broadcast::Sender<EventEnvelope<T>>> {
        self.inner.read().topics.get(topic.0).cloned()
    }

    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<EventEnvelope<T>> {
        self.sender(topic).subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<EventEnvelope<T>> {
        self.subscribe(WILDCARD)
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.existing_sender(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

fn current_ts_ms() -> u128 {
    Utc::now().timestamp_millis().max(0) as u128
}
