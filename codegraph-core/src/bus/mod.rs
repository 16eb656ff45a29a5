//! Process-wide publish/subscribe fabric (spec §3, §4.9): TTL'd entries,
//! exact and regex topic subscriptions, and delivery that never blocks the
//! publisher. A global singleton per process, per the design notes on
//! global mutable state — constructed once at startup and handed to every
//! agent as a shared `Arc`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

/// One published message. `expires_at` entries past their deadline are
/// evicted lazily by [`KnowledgeBus::query`] and never redelivered.
#[derive(Debug, Clone)]
pub struct BusEntry {
    pub topic: String,
    pub data: Value,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl BusEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.map(|exp| Utc::now() > exp).unwrap_or(false)
    }
}

enum TopicPattern {
    Exact(String),
    Regex(Regex),
}

impl TopicPattern {
    fn matches(&self, topic: &str) -> bool {
        match self {
            TopicPattern::Exact(t) => t == topic,
            TopicPattern::Regex(re) => re.is_match(topic),
        }
    }
}

struct Subscriber {
    pattern: TopicPattern,
    sender: mpsc::Sender<BusEntry>,
}

const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;
const DEFAULT_HISTORY_PER_TOPIC: usize = 200;

/// The bus itself. Cheap to clone (wraps `Arc`-backed concurrent maps).
#[derive(Clone)]
pub struct KnowledgeBus {
    inner: Arc<Inner>,
}

struct Inner {
    subscribers: DashMap<u64, Subscriber>,
    history: DashMap<String, Vec<BusEntry>>,
    next_subscriber_id: std::sync::atomic::AtomicU64,
}

impl Default for KnowledgeBus {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: DashMap::new(),
                history: DashMap::new(),
                next_subscriber_id: std::sync::atomic::AtomicU64::new(0),
            }),
        }
    }

    /// Publishes `data` under `topic`. Delivery to subscribers is
    /// best-effort and non-blocking: a full subscriber channel drops the
    /// message for that subscriber and logs a warning, other subscribers are
    /// unaffected.
    pub fn publish(&self, topic: impl Into<String>, data: Value, source: impl Into<String>, ttl: Option<Duration>) {
        let topic = topic.into();
        let entry = BusEntry {
            topic: topic.clone(),
            data,
            source: source.into(),
            timestamp: Utc::now(),
            expires_at: ttl.and_then(|d| chrono::Duration::from_std(d).ok()).map(|d| Utc::now() + d),
        };

        {
            let mut bucket = self.inner.history.entry(topic.clone()).or_default();
            bucket.push(entry.clone());
            if bucket.len() > DEFAULT_HISTORY_PER_TOPIC {
                let overflow = bucket.len() - DEFAULT_HISTORY_PER_TOPIC;
                bucket.drain(0..overflow);
            }
        }

        for sub in self.inner.subscribers.iter() {
            if !sub.pattern.matches(&topic) {
                continue;
            }
            if let Err(mpsc::error::TrySendError::Full(_)) = sub.sender.try_send(entry.clone()) {
                warn!(topic = %topic, subscriber = sub.key(), "knowledge bus subscriber channel full, dropping entry");
            }
        }
    }

    /// Subscribes to an exact topic name. Returns a receiver that yields
    /// entries in publish order; dropping the receiver unsubscribes.
    pub fn subscribe(&self, topic: impl Into<String>) -> mpsc::Receiver<BusEntry> {
        self.subscribe_with(TopicPattern::Exact(topic.into()))
    }

    /// Subscribes to every topic matching `pattern` (a regex over topic names).
    pub fn subscribe_regex(&self, pattern: &str) -> Result<mpsc::Receiver<BusEntry>, regex::Error> {
        Ok(self.subscribe_with(TopicPattern::Regex(Regex::new(pattern)?)))
    }

    fn subscribe_with(&self, pattern: TopicPattern) -> mpsc::Receiver<BusEntry> {
        let (tx, rx) = mpsc::channel(DEFAULT_SUBSCRIBER_CAPACITY);
        let id = self.inner.next_subscriber_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.inner.subscribers.insert(id, Subscriber { pattern, sender: tx });
        rx
    }

    /// Returns up to `limit` non-expired entries most recently published
    /// under the exact topic `topic`, newest first.
    pub fn query(&self, topic: &str, limit: usize) -> Vec<BusEntry> {
        let Some(bucket) = self.inner.history.get(topic) else {
            return Vec::new();
        };
        bucket
            .iter()
            .rev()
            .filter(|e| !e.is_expired())
            .take(limit)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exact_subscriber_receives_matching_publishes_only() {
        let bus = KnowledgeBus::new();
        let mut rx = bus.subscribe("index:updated");
        bus.publish("index:updated", serde_json::json!({"file": "a.rs"}), "indexer", None);
        bus.publish("semantic:new_entities", serde_json::json!({}), "indexer", None);

        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.topic, "index:updated");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn regex_subscriber_matches_topic_family() {
        let bus = KnowledgeBus::new();
        let mut rx = bus.subscribe_regex(r"^query:request:.*$").unwrap();
        bus.publish("query:request:42", serde_json::json!({}), "queryAgent", None);
        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.topic, "query:request:42");
    }

    #[tokio::test]
    async fn expired_entries_are_not_returned_by_query() {
        let bus = KnowledgeBus::new();
        bus.publish("cache:invalidate", serde_json::json!({}), "cache", Some(Duration::from_millis(1)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(bus.query("cache:invalidate", 10).is_empty());
    }

    #[tokio::test]
    async fn one_full_subscriber_does_not_block_others() {
        let bus = KnowledgeBus::new();
        let mut slow = bus.subscribe("resources:adjusted");
        let mut fast = bus.subscribe("resources:adjusted");
        for i in 0..(DEFAULT_SUBSCRIBER_CAPACITY + 5) {
            bus.publish("resources:adjusted", serde_json::json!({"i": i}), "manager", None);
        }
        // Fast subscriber can still drain without panicking; slow one simply dropped overflow.
        assert!(fast.try_recv().is_ok());
        assert!(slow.try_recv().is_ok());
    }
}
