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

use tracing::debug;

use crate::common::{CourierError, RoutingError};
use crate::endpoint::BusSession;
use crate::message::{Address, Headers, Message, MessageEnvelope, MessageId, MessageIntent};
use crate::outbox::OutboxTransaction;
use crate::pipeline::Extensions;

/// What a handler sees of the message being processed, and how it sends.
///
/// Messages sent, published or replied from a handler are held back until
/// every handler for the incoming message has succeeded. With the outbox
/// enabled they are committed together with the incoming message's
/// processed mark.
pub struct HandlerContext {
    envelope: MessageEnvelope,
    extensions: Extensions,
    session: BusSession,
}

impl HandlerContext {
    pub(crate) fn new(envelope: MessageEnvelope, extensions: Extensions, session: BusSession) -> Self {
        Self {
            envelope,
            extensions,
            session,
        }
    }

    /// Identifier of the incoming message
    #[must_use]
    pub const fn message_id(&self) -> &MessageId {
        self.envelope.id()
    }

    /// Headers of the incoming message
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        self.envelope.headers()
    }

    /// The incoming message
    #[must_use]
    pub const fn envelope(&self) -> &MessageEnvelope {
        &self.envelope
    }

    /// The endpoint's own address
    #[must_use]
    pub const fn local_address(&self) -> &Address {
        self.session.local_address()
    }

    /// Values attached by pipeline steps
    #[must_use]
    pub const fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Mutable access to the values attached by pipeline steps
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// The outbox unit of work, when the outbox is enabled. Side effects
    /// enlisted here are applied only if processing commits.
    #[must_use]
    pub fn unit_of_work(&self) -> Option<&OutboxTransaction> {
        self.extensions.get::<OutboxTransaction>()
    }

    /// Sends `message` to its conventional destination.
    pub async fn send<M: Message>(&mut self, message: &M) -> Result<(), CourierError> {
        self.send_envelope(message, None).await
    }

    /// Sends `message` to `destination`.
    pub async fn send_to<M: Message>(&mut self, destination: Address, message: &M) -> Result<(), CourierError> {
        self.send_envelope(message, Some(destination)).await
    }

    /// Publishes `message` to every subscriber of its type.
    pub async fn publish<M: Message>(&mut self, message: &M) -> Result<(), CourierError> {
        let envelope = self
            .session
            .envelope_for(message, MessageIntent::Publish)?
            .correlation_id(self.conversation_id())
            .build();
        self.dispatch(envelope, None).await
    }

    /// Replies to the sender of the incoming message.
    ///
    /// Fails with [`RoutingError::NoReplyToAddress`] when the incoming message
    /// has no reply-to address.
    pub async fn reply<M: Message>(&mut self, message: &M) -> Result<(), CourierError> {
        let Some(destination) = self.envelope.reply_to().cloned() else {
            return Err(RoutingError::NoReplyToAddress {
                message_id: self.envelope.id().clone(),
            }
            .into());
        };
        let envelope = self.envelope.for_reply(message)?;
        debug!(reply_to = %destination, "replying");
        self.dispatch(envelope, Some(destination)).await
    }

    /// True once the endpoint is shutting down.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.session.is_cancelled()
    }

    pub(crate) fn into_extensions(self) -> Extensions {
        self.extensions
    }

    async fn send_envelope<M: Message>(
        &mut self,
        message: &M,
        destination: Option<Address>,
    ) -> Result<(), CourierError> {
        let envelope = self
            .session
            .envelope_for(message, MessageIntent::Send)?
            .correlation_id(self.conversation_id())
            .build();
        self.dispatch(envelope, destination).await
    }

    async fn dispatch(&mut self, envelope: MessageEnvelope, destination: Option<Address>) -> Result<(), CourierError> {
        self.session
            .dispatch(envelope, destination, &mut self.extensions)
            .await
            .map_err(CourierError::from)
    }

    fn conversation_id(&self) -> MessageId {
        self.envelope
            .correlation_id()
            .unwrap_or_else(|| self.envelope.id())
            .clone()
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("message_id", self.envelope.id())
            .field("local_address", self.session.local_address())
            .finish_non_exhaustive()
    }
}
