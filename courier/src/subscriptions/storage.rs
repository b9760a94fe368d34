/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

use crate::common::SubscriptionError;
use crate::message::Address;

/// A flat `(message type name, subscriber)` store.
///
/// Backends only persist pairs; the polymorphic lookup over a type's ancestors
/// is done by [`SubscriptionRegistry`](crate::subscriptions::SubscriptionRegistry).
/// Implementations must be safe to call from every worker at once.
#[async_trait]
pub trait SubscriptionStorage: Send + Sync + 'static {
    /// Stores the pair. Returns `false` when it was already present.
    async fn insert(&self, message_type: &str, subscriber: &Address) -> Result<bool, SubscriptionError>;

    /// Deletes the pair. Returns `false` when it was not present.
    async fn remove(&self, message_type: &str, subscriber: &Address) -> Result<bool, SubscriptionError>;

    /// The union of the subscribers of every type in `message_types`.
    async fn subscribers_for(
        &self,
        message_types: &[&str],
    ) -> Result<BTreeSet<Address>, SubscriptionError>;
}

type Subscribers = Arc<DashMap<String, BTreeSet<Address>>>;

/// Subscription storage kept in process memory.
///
/// Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct InMemorySubscriptionStorage {
    subscribers: Subscribers,
}

impl InMemorySubscriptionStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStorage for InMemorySubscriptionStorage {
    async fn insert(&self, message_type: &str, subscriber: &Address) -> Result<bool, SubscriptionError> {
        let inserted = self
            .subscribers
            .entry(message_type.to_string())
            .or_default()
            .insert(subscriber.clone());
        trace!(message_type, subscriber = %subscriber, inserted, "subscription stored");
        Ok(inserted)
    }

    async fn remove(&self, message_type: &str, subscriber: &Address) -> Result<bool, SubscriptionError> {
        let removed = match self.subscribers.get_mut(message_type) {
            Some(mut set) => set.remove(subscriber),
            None => false,
        };
        self.subscribers
            .remove_if(message_type, |_, set| set.is_empty());
        trace!(message_type, subscriber = %subscriber, removed, "subscription removed");
        Ok(removed)
    }

    async fn subscribers_for(
        &self,
        message_types: &[&str],
    ) -> Result<BTreeSet<Address>, SubscriptionError> {
        let mut found = BTreeSet::new();
        for message_type in message_types {
            if let Some(set) = self.subscribers.get(*message_type) {
                found.extend(set.iter().cloned());
            }
        }
        Ok(found)
    }
}
