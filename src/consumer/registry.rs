//! Subscription registry
//!
//! Maps a queue name to the one `(consumer, callback)` pair allowed to handle
//! it. The registry is owned by a single `SubscriptionConsumer` and mutated
//! through `&mut self`, so it needs no locking of its own.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::plain::Consumer;
use super::subscription::Callback;
use crate::utils::{GatewayError, Result};

#[derive(Clone)]
pub struct Subscription {
    pub consumer: Consumer,
    pub callback: Callback,
}

impl Subscription {
    fn matches(&self, consumer: &Consumer, callback: &Callback) -> bool {
        self.consumer.same(consumer) && Arc::ptr_eq(&self.callback, callback)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("queue", &self.consumer.queue().name())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default, Clone)]
pub struct SubscriptionRegistry {
    entries: BTreeMap<String, Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for the consumer's queue. Registering the same
    /// pair again is a no-op; a different pair on an occupied queue conflicts.
    pub fn subscribe(&mut self, consumer: &Consumer, callback: Callback) -> Result<()> {
        let queue = consumer.queue().name().to_string();
        if let Some(existing) = self.entries.get(&queue) {
            if existing.matches(consumer, &callback) {
                return Ok(());
            }
            return Err(GatewayError::SubscriptionConflict { queue });
        }

        self.entries.insert(
            queue,
            Subscription {
                consumer: consumer.clone(),
                callback,
            },
        );
        Ok(())
    }

    /// Remove the consumer's entry if it is the registered one. Returns
    /// whether anything was removed.
    pub fn unsubscribe(&mut self, consumer: &Consumer) -> bool {
        let queue = consumer.queue().name();
        match self.entries.get(queue) {
            Some(existing) if existing.consumer.same(consumer) => {
                self.entries.remove(queue);
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, queue: &str) -> Option<&Subscription> {
        self.entries.get(queue)
    }

    pub fn queue_names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The only registered subscription, if exactly one exists.
    pub fn single(&self) -> Option<&Subscription> {
        match self.entries.len() {
            1 => self.entries.values().next(),
            _ => None,
        }
    }
}
