//! MessageBus — topic registry, bounded per-subscriber queues, fan-out publish.
//!
//! Delivery is at-most-once per subscriber, FIFO per (publisher, subscriber)
//! pair, with no ordering guarantee across publishers or topics. A publish
//! never blocks the publisher: a full subscriber queue drops that one
//! delivery and increments a counter rather than stalling anyone.

pub mod message;

pub use message::{Message, Priority};

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

/// Default bounded depth for a subscriber queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 100;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("topic '{0}' is already subscribed by node '{1}'")]
    AlreadySubscribed(String, String),
}

struct Subscriber {
    node_name: String,
    sender: crossbeam_channel::Sender<Message>,
}

#[derive(Default)]
struct Topics {
    by_topic: HashMap<String, Vec<Subscriber>>,
}

/// A bounded receiving handle returned by [`MessageBus::subscribe`]. Nodes hold
/// only this read handle; the bus exclusively owns the sending side.
pub type SubscriberQueue = crossbeam_channel::Receiver<Message>;

/// Snapshot of bus-wide counters, returned by [`MessageBus::get_stats`].
#[derive(Debug, Clone, Serialize)]
pub struct BusStats {
    pub message_count: u64,
    pub drop_count: u64,
    pub topic_subscriber_counts: HashMap<String, usize>,
    pub uptime_secs: f64,
}

pub struct MessageBus {
    topics: RwLock<Topics>,
    message_count: AtomicU64,
    drop_count: AtomicU64,
    start_time: Instant,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(Topics::default()),
            message_count: AtomicU64::new(0),
            drop_count: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Idempotent — creating a topic that already exists is a no-op.
    pub fn create_topic(&self, topic: &str) {
        let mut topics = self.topics.write();
        topics.by_topic.entry(topic.to_string()).or_default();
    }

    /// Register `node`'s queue under `topic`, allocating a bounded channel of
    /// [`DEFAULT_QUEUE_DEPTH`]. Re-subscribing the same (node, topic) pair
    /// replaces the prior queue — double-subscribe is idempotent, not an error.
    pub fn subscribe(&self, node: &str, topic: &str) -> SubscriberQueue {
        let (tx, rx) = crossbeam_channel::bounded(DEFAULT_QUEUE_DEPTH);
        let mut topics = self.topics.write();
        let subs = topics.by_topic.entry(topic.to_string()).or_default();
        subs.retain(|s| s.node_name != node);
        subs.push(Subscriber {
            node_name: node.to_string(),
            sender: tx,
        });
        debug!(node, topic, "subscribed");
        rx
    }

    /// Reverse of [`MessageBus::subscribe`]. A no-op if the pair was never
    /// subscribed.
    pub fn unsubscribe(&self, node: &str, topic: &str) {
        let mut topics = self.topics.write();
        if let Some(subs) = topics.by_topic.get_mut(topic) {
            subs.retain(|s| s.node_name != node);
            debug!(node, topic, "unsubscribed");
        }
    }

    /// Fan a message out to every subscriber of `message.topic`. Always
    /// returns `true` — publishing with zero subscribers is success, not an
    /// error. Individual full/disconnected subscriber queues are dropped and
    /// counted rather than propagated.
    pub fn publish(&self, message: Message) -> bool {
        self.message_count.fetch_add(1, Ordering::Relaxed);
        let topics = self.topics.read();
        let mut delivered = 0usize;
        if let Some(subs) = topics.by_topic.get(&message.topic) {
            for sub in subs {
                match sub.sender.try_send(message.clone()) {
                    Ok(()) => delivered += 1,
                    Err(crossbeam_channel::TrySendError::Full(_)) => {
                        self.drop_count.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            topic = %message.topic,
                            node = %sub.node_name,
                            "subscriber queue full, dropping delivery"
                        );
                    }
                    Err(crossbeam_channel::TrySendError::Disconnected(_)) => {
                        self.drop_count.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
        debug!(
            topic = %message.topic,
            source = %message.source_node,
            delivered,
            "published"
        );
        true
    }

    pub fn get_stats(&self) -> BusStats {
        let topics = self.topics.read();
        let topic_subscriber_counts = topics
            .by_topic
            .iter()
            .map(|(topic, subs)| (topic.clone(), subs.len()))
            .collect();
        BusStats {
            message_count: self.message_count.load(Ordering::Relaxed),
            drop_count: self.drop_count.load(Ordering::Relaxed),
            topic_subscriber_counts,
            uptime_secs: self.start_time.elapsed().as_secs_f64(),
        }
    }
}
