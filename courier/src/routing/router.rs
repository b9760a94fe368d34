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

use std::sync::Arc;

use derive_new::new;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::common::RoutingError;
use crate::message::{Address, MessageEnvelope, MessageIntent};
use crate::routing::RouteTable;
use crate::subscriptions::SubscriptionRegistry;

/// A message on its way out, before destinations are resolved.
#[derive(new, Debug, Clone)]
pub struct OutgoingMessage {
    /// The message.
    pub envelope: MessageEnvelope,
    /// Explicit destination, for sends and replies.
    pub destination: Option<Address>,
}

/// A message paired with one resolved destination.
#[derive(new, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedMessage {
    /// Where the transport delivers the message.
    pub destination: Address,
    /// The message.
    pub envelope: MessageEnvelope,
}

/// Resolves destinations for outgoing messages.
///
/// Routing performs no transport I/O. Publishes consult the subscription
/// registry on every call.
#[derive(Debug, Clone)]
pub struct DispatchRouter {
    routes: Arc<RouteTable>,
    subscriptions: SubscriptionRegistry,
}

impl DispatchRouter {
    /// Creates a router over `routes` and `subscriptions`.
    pub fn new(routes: RouteTable, subscriptions: SubscriptionRegistry) -> Self {
        Self {
            routes: Arc::new(routes),
            subscriptions,
        }
    }

    /// The convention table used for sends without an explicit destination.
    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Resolves every destination of `outgoing`.
    ///
    /// * `Send`: the explicit destination, else the route table, else
    ///   [`RoutingError::NoDestinationSpecified`].
    /// * `Publish`: every current subscriber of the type or its ancestors.
    ///   No subscribers is not an error.
    /// * `Reply`: the explicit destination (the request's reply-to address),
    ///   else [`RoutingError::NoReplyToAddress`].
    #[instrument(skip_all, fields(message_id = %outgoing.envelope.id(), intent = %outgoing.envelope.intent()))]
    pub async fn route(&self, outgoing: &OutgoingMessage) -> Result<Vec<RoutedMessage>, RoutingError> {
        let envelope = &outgoing.envelope;
        let routed = match envelope.intent() {
            MessageIntent::Send => {
                let destination = outgoing
                    .destination
                    .as_ref()
                    .or_else(|| self.routes.resolve(envelope.message_type()))
                    .cloned()
                    .ok_or_else(|| RoutingError::NoDestinationSpecified {
                        message_type: envelope.message_type().name().to_string(),
                    })?;
                vec![RoutedMessage::new(destination, envelope.clone())]
            }
            MessageIntent::Publish => self
                .subscriptions
                .get_subscribers(envelope.message_type())
                .await?
                .into_iter()
                .map(|destination| RoutedMessage::new(destination, envelope.clone()))
                .collect(),
            MessageIntent::Reply => {
                let destination = outgoing.destination.clone().ok_or_else(|| {
                    RoutingError::NoReplyToAddress {
                        message_id: envelope
                            .correlation_id()
                            .unwrap_or_else(|| envelope.id())
                            .clone(),
                    }
                })?;
                vec![RoutedMessage::new(destination, envelope.clone())]
            }
        };
        debug!(destinations = routed.len(), "message routed");
        Ok(routed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;
    use crate::subscriptions::InMemorySubscriptionStorage;

    fn router(routes: RouteTable) -> (DispatchRouter, SubscriptionRegistry) {
        let registry = SubscriptionRegistry::new(Arc::new(InMemorySubscriptionStorage::new()));
        (DispatchRouter::new(routes, registry.clone()), registry)
    }

    fn envelope(name: &str, intent: MessageIntent) -> MessageEnvelope {
        MessageEnvelope::builder(MessageType::new(name), b"{}".to_vec())
            .intent(intent)
            .build()
    }

    #[tokio::test]
    async fn send_prefers_the_explicit_destination() {
        let (router, _) = router(RouteTable::new().with_route("Ping", Address::new("conventional")));
        let outgoing = OutgoingMessage::new(envelope("Ping", MessageIntent::Send), Some(Address::new("explicit")));

        let routed = router.route(&outgoing).await.unwrap();
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].destination, Address::new("explicit"));
    }

    #[tokio::test]
    async fn send_falls_back_to_conventions() {
        let (router, _) = router(RouteTable::new().with_route("Ping", Address::new("conventional")));
        let outgoing = OutgoingMessage::new(envelope("Ping", MessageIntent::Send), None);

        let routed = router.route(&outgoing).await.unwrap();
        assert_eq!(routed[0].destination, Address::new("conventional"));
    }

    #[tokio::test]
    async fn send_without_any_destination_fails() {
        let (router, _) = router(RouteTable::new());
        let outgoing = OutgoingMessage::new(envelope("Ping", MessageIntent::Send), None);

        assert!(matches!(
            router.route(&outgoing).await,
            Err(RoutingError::NoDestinationSpecified { message_type }) if message_type == "Ping"
        ));
    }

    #[tokio::test]
    async fn publish_without_subscribers_routes_nowhere() {
        let (router, _) = router(RouteTable::new());
        let outgoing = OutgoingMessage::new(envelope("Pinged", MessageIntent::Publish), None);

        assert!(router.route(&outgoing).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn publish_fans_out_to_each_subscriber() {
        let (router, registry) = router(RouteTable::new());
        let pinged = MessageType::new("Pinged");
        registry.subscribe(&pinged, Address::new("a")).await.unwrap();
        registry.subscribe(&pinged, Address::new("b")).await.unwrap();

        let outgoing = OutgoingMessage::new(envelope("Pinged", MessageIntent::Publish), None);
        let destinations: Vec<_> = router
            .route(&outgoing)
            .await
            .unwrap()
            .into_iter()
            .map(|routed| routed.destination)
            .collect();
        assert_eq!(destinations, vec![Address::new("a"), Address::new("b")]);
    }

    #[tokio::test]
    async fn reply_without_reply_to_fails() {
        let (router, _) = router(RouteTable::new());
        let outgoing = OutgoingMessage::new(envelope("Pong", MessageIntent::Reply), None);

        assert!(matches!(
            router.route(&outgoing).await,
            Err(RoutingError::NoReplyToAddress { .. })
        ));
    }
}
