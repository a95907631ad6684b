//! Subscription registry: topic → registered client channels.
//!
//! Each topic's set lives in one DashMap entry, so every mutation of a
//! topic happens under that entry's shard lock. That is what makes the
//! "first registrant" answer of `register` exact under concurrent calls:
//! of N simultaneous first registrations exactly one sees an empty set.
//!
//! Records are created lazily on first registration and removed as soon
//! as their set becomes empty.

use crate::client::{ClientChannel, ClientId};
use crate::topic::TopicKey;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Registered client channels per streaming topic.
#[derive(Default)]
pub struct SubscriptionRegistry {
    topics: DashMap<TopicKey, HashMap<ClientId, Arc<ClientChannel>>>,
}

impl SubscriptionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `channel` to `topic`'s set.
    ///
    /// Returns true if the set was empty before this call. Registering a
    /// channel that is already present changes nothing.
    pub fn register(&self, topic: &TopicKey, channel: Arc<ClientChannel>) -> bool {
        let mut set = self.topics.entry(topic.clone()).or_default();
        let first = set.is_empty();
        set.insert(channel.id, channel);
        debug!("Registered client on {} ({} total)", topic, set.len());
        first
    }

    /// Remove a channel from `topic`'s set.
    ///
    /// Returns true if the topic has no registrants afterwards. Removing a
    /// channel that is not registered is a no-op.
    pub fn unregister(&self, topic: &TopicKey, client_id: &ClientId) -> bool {
        let now_empty = match self.topics.get_mut(topic) {
            Some(mut set) => {
                if set.remove(client_id).is_some() {
                    debug!("Unregistered client {} from {} ({} left)", client_id, topic, set.len());
                }
                set.is_empty()
            }
            None => return true,
        };

        if now_empty {
            self.topics.remove_if(topic, |_, set| set.is_empty());
        }
        now_empty
    }

    /// Copy of `topic`'s current registrants.
    ///
    /// The copy is taken under the entry lock, so a delivery pass over it
    /// never observes a half-applied mutation.
    pub fn snapshot(&self, topic: &TopicKey) -> Vec<Arc<ClientChannel>> {
        self.topics
            .get(topic)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `topic` has no registrants.
    pub fn is_empty(&self, topic: &TopicKey) -> bool {
        self.topics.get(topic).map_or(true, |set| set.is_empty())
    }

    /// Whether `client_id` is registered under `topic`.
    pub fn contains(&self, topic: &TopicKey, client_id: &ClientId) -> bool {
        self.topics
            .get(topic)
            .is_some_and(|set| set.contains_key(client_id))
    }

    /// Number of topics with at least one registrant.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Number of registrations across all topics.
    pub fn client_count(&self) -> usize {
        self.topics.iter().map(|entry| entry.value().len()).sum()
    }
}
