//! Subscription registry
//!
//! Ordered mapping from topic filter to subscription options. Mutated only by
//! the session actor; used to reject duplicate subscribes and to replay
//! subscriptions in insertion order after a reconnect.

use crate::transport::SubscribeOptions;

/// Insertion-ordered set of `(topic filter, options)` pairs, unique by topic.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionRegistry {
    entries: Vec<(String, SubscribeOptions)>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.entries.iter().any(|(t, _)| t == topic)
    }

    /// Insert if the topic is not already registered. Returns `false` on a
    /// duplicate, leaving the existing entry untouched (no merge).
    pub fn insert(&mut self, topic: impl Into<String>, options: SubscribeOptions) -> bool {
        let topic = topic.into();
        if self.contains(&topic) {
            return false;
        }
        self.entries.push((topic, options));
        true
    }

    /// Remove the topic if present. Idempotent; returns whether it was there.
    pub fn remove(&mut self, topic: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(t, _)| t != topic);
        before != self.entries.len()
    }

    /// Entries in insertion order, for deterministic replay.
    pub fn iter(&self) -> impl Iterator<Item = (&str, SubscribeOptions)> {
        self.entries.iter().map(|(t, o)| (t.as_str(), *o))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
