//! Bounded message log with a fixed eviction policy.
//!
//! DESIGN
//! ======
//! Every append builds a new `Arc<[Message]>` instead of mutating in place,
//! so a snapshot handed to the view never changes underneath it. Capacity is
//! small (tens of messages), which keeps the copy cheap.

#[cfg(test)]
#[path = "buffer_test.rs"]
mod tests;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Default number of messages retained.
pub const DEFAULT_BUFFER_CAPACITY: usize = 50;

/// Ordering and eviction rule for a [`MessageBuffer`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Arrival order; the oldest message is dropped first.
    #[default]
    EvictOldest,
    /// Newest first; the oldest message (the tail) is dropped first.
    PrependNewest,
}

/// Capacity-bounded, snapshot-producing message log.
#[derive(Clone, Debug)]
pub struct MessageBuffer {
    capacity: usize,
    policy: EvictionPolicy,
    messages: Arc<[Message]>,
    next_id: u64,
}

impl MessageBuffer {
    /// Create an empty buffer. A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize, policy: EvictionPolicy) -> Self {
        Self { capacity: capacity.max(1), policy, messages: Arc::from(Vec::new()), next_id: 1 }
    }

    /// Append a message under the eviction policy and return the new snapshot.
    pub fn push(&mut self, mut message: Message) -> Arc<[Message]> {
        message.id = self.next_id;
        self.next_id += 1;

        let next: Vec<Message> = match self.policy {
            EvictionPolicy::EvictOldest => {
                let skip = (self.messages.len() + 1).saturating_sub(self.capacity);
                self.messages[skip..]
                    .iter()
                    .cloned()
                    .chain(std::iter::once(message))
                    .collect()
            }
            EvictionPolicy::PrependNewest => std::iter::once(message)
                .chain(self.messages.iter().cloned())
                .take(self.capacity)
                .collect(),
        };
        self.messages = Arc::from(next);
        Arc::clone(&self.messages)
    }

    /// Current contents; cheap to clone and never mutated.
    #[must_use]
    pub fn snapshot(&self) -> Arc<[Message]> {
        Arc::clone(&self.messages)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }
}
