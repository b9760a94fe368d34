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

use derive_new::new;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace};

use crate::common::{SubscribedCallback, SubscriptionError};
use crate::message::{Address, MessageType};
use crate::subscriptions::SubscriptionStorage;

/// A subscriber's interest in a message type.
#[derive(new, Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    /// Name of the subscribed message type.
    pub message_type: String,
    /// Where published messages of that type are delivered.
    pub subscriber: Address,
}

/// Subscribe, unsubscribe and polymorphic subscriber lookup over a
/// [`SubscriptionStorage`].
///
/// The registry holds only a handle to the storage; every lookup goes to the
/// backend so subscription changes are visible immediately.
///
/// With a local machine set, unqualified subscriber addresses are stored
/// qualified with it, so `billing` and `billing@<machine>` are one subscriber.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    storage: Arc<dyn SubscriptionStorage>,
    local_machine: Option<Arc<str>>,
    on_subscribed: Arc<RwLock<Vec<SubscribedCallback>>>,
}

impl SubscriptionRegistry {
    /// Creates a registry backed by `storage`.
    pub fn new(storage: Arc<dyn SubscriptionStorage>) -> Self {
        Self {
            storage,
            local_machine: None,
            on_subscribed: Arc::default(),
        }
    }

    /// Qualifies unqualified subscriber addresses with `machine`.
    #[must_use]
    pub fn with_local_machine(mut self, machine: impl Into<Arc<str>>) -> Self {
        self.local_machine = Some(machine.into());
        self
    }

    /// Registers `callback` to run after each subscription that did not exist before.
    pub fn on_subscribed(&self, callback: impl Fn(&Subscription) + Send + Sync + 'static) {
        self.on_subscribed.write().push(Arc::new(callback));
    }

    /// Subscribes `subscriber` to `message_type`. Subscribing twice is a no-op.
    #[instrument(skip(self, message_type), fields(message_type = %message_type))]
    pub async fn subscribe(
        &self,
        message_type: &MessageType,
        subscriber: Address,
    ) -> Result<(), SubscriptionError> {
        let subscriber = self.qualify(&subscriber);
        let inserted = self
            .storage
            .insert(message_type.name(), &subscriber)
            .await?;
        if inserted {
            debug!(subscriber = %subscriber, "subscribed");
            let subscription = Subscription::new(message_type.name().to_string(), subscriber);
            let callbacks = self.on_subscribed.read().clone();
            for callback in &callbacks {
                callback(&subscription);
            }
        } else {
            trace!(subscriber = %subscriber, "already subscribed");
        }
        Ok(())
    }

    /// Removes the subscription. Removing one that does not exist is a no-op.
    #[instrument(skip(self, message_type), fields(message_type = %message_type))]
    pub async fn unsubscribe(
        &self,
        message_type: &MessageType,
        subscriber: &Address,
    ) -> Result<(), SubscriptionError> {
        let subscriber = self.qualify(subscriber);
        if self.storage.remove(message_type.name(), &subscriber).await? {
            debug!(subscriber = %subscriber, "unsubscribed");
        }
        Ok(())
    }

    /// Every subscriber of `message_type` or of any of its ancestors.
    pub async fn get_subscribers(
        &self,
        message_type: &MessageType,
    ) -> Result<BTreeSet<Address>, SubscriptionError> {
        let lineage: Vec<&str> = message_type.lineage().collect();
        let subscribers = self.storage.subscribers_for(&lineage).await?;
        trace!(message_type = %message_type, count = subscribers.len(), "subscribers resolved");
        Ok(subscribers)
    }

    fn qualify(&self, address: &Address) -> Address {
        match (&self.local_machine, address.machine()) {
            (Some(machine), None) => address.at(machine.as_ref()),
            _ => address.clone(),
        }
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("local_machine", &self.local_machine)
            .field("on_subscribed", &self.on_subscribed.read().len())
            .finish_non_exhaustive()
    }
}
