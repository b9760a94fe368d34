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

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::common::ProcessingFailure;
use crate::message::headers::{self, Headers};
use crate::message::{message_type_of, Address, Message, MessageId, MessageType};

/// What the sender means by a message, which decides how it is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageIntent {
    /// A command for exactly one destination.
    Send,
    /// An event for every current subscriber.
    Publish,
    /// A response routed to the originating message's reply-to address.
    Reply,
}

impl MessageIntent {
    /// Header representation of the intent.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Send => "Send",
            Self::Publish => "Publish",
            Self::Reply => "Reply",
        }
    }

    fn from_header_value(value: &str) -> Option<Self> {
        match value {
            "Send" => Some(Self::Send),
            "Publish" => Some(Self::Publish),
            "Reply" => Some(Self::Reply),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable message in flight.
///
/// The well-known metadata (identifier, intent, type lineage, correlation and
/// reply-to) is mirrored into [`Headers`] when the envelope is built, so a
/// transport that only carries headers and a body can rebuild it with
/// [`MessageEnvelope::from_transport`].
///
/// Envelopes are never mutated. Every hop that needs different headers calls
/// one of the `with_*` methods and gets a new envelope back; the body is shared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    id: MessageId,
    headers: Headers,
    body: Arc<[u8]>,
    message_type: MessageType,
    intent: MessageIntent,
    correlation_id: Option<MessageId>,
    reply_to: Option<Address>,
}

impl MessageEnvelope {
    /// Starts building an envelope around an already-encoded body.
    pub fn builder(message_type: MessageType, body: impl Into<Arc<[u8]>>) -> EnvelopeBuilder {
        EnvelopeBuilder {
            id: None,
            headers: Headers::new(),
            body: body.into(),
            message_type,
            intent: MessageIntent::Send,
            correlation_id: None,
            reply_to: None,
        }
    }

    /// Serializes `message` as JSON and starts building an envelope for it.
    pub fn builder_for<M: Message>(message: &M) -> Result<EnvelopeBuilder, serde_json::Error> {
        let body = serde_json::to_vec(message)?;
        Ok(Self::builder(message_type_of::<M>(), body))
    }

    /// Serializes `message` into a new envelope with a generated identifier.
    pub fn from_message<M: Message>(
        message: &M,
        intent: MessageIntent,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::builder_for(message)?.intent(intent).build())
    }

    /// Rebuilds an envelope from transport headers and a raw body.
    ///
    /// Fails with a fatal failure when the identifier or type headers are
    /// missing, since no retry can recover them.
    pub fn from_transport(
        headers: Headers,
        body: impl Into<Arc<[u8]>>,
    ) -> Result<Self, ProcessingFailure> {
        let id = headers
            .get(headers::MESSAGE_ID)
            .map(MessageId::from)
            .ok_or_else(|| ProcessingFailure::fatal("message carries no identifier header"))?;
        let message_type = headers
            .get(headers::ENCLOSED_MESSAGE_TYPES)
            .and_then(MessageType::from_header_value)
            .ok_or_else(|| {
                ProcessingFailure::fatal(format!("message `{id}` carries no enclosed message type"))
            })?;
        let intent = headers
            .get(headers::MESSAGE_INTENT)
            .and_then(MessageIntent::from_header_value)
            .unwrap_or(MessageIntent::Send);
        let correlation_id = headers.get(headers::CORRELATION_ID).map(MessageId::from);
        let reply_to = match headers.get(headers::REPLY_TO_ADDRESS) {
            Some(raw) => Some(Address::parse(raw).map_err(|error| {
                ProcessingFailure::fatal(format!("message `{id}` has a bad reply-to address: {error}"))
            })?),
            None => None,
        };
        Ok(Self {
            id,
            headers,
            body: body.into(),
            message_type,
            intent,
            correlation_id,
            reply_to,
        })
    }

    /// The message identifier.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> &MessageId {
        &self.id
    }

    /// All headers, including the well-known ones.
    #[inline]
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Shorthand for `headers().get(key)`.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// The encoded body.
    #[inline]
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The enclosed message type.
    #[inline]
    #[must_use]
    pub const fn message_type(&self) -> &MessageType {
        &self.message_type
    }

    /// How the message is routed.
    #[inline]
    #[must_use]
    pub const fn intent(&self) -> MessageIntent {
        self.intent
    }

    /// The conversation this message belongs to, if any.
    #[inline]
    #[must_use]
    pub const fn correlation_id(&self) -> Option<&MessageId> {
        self.correlation_id.as_ref()
    }

    /// Where replies to this message go.
    #[inline]
    #[must_use]
    pub const fn reply_to(&self) -> Option<&Address> {
        self.reply_to.as_ref()
    }

    /// Returns a copy of this envelope with one header set.
    #[must_use]
    pub fn with_header(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.headers.insert(key, value);
        next
    }

    /// Returns a copy of this envelope with every pair in `extra` set.
    #[must_use]
    pub fn with_headers<K, V>(&self, extra: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut next = self.clone();
        next.headers.extend(extra);
        next
    }

    /// Returns a copy of this envelope without the header `key`.
    #[must_use]
    pub fn without_header(&self, key: &str) -> Self {
        let mut next = self.clone();
        next.headers.remove(key);
        next
    }

    /// Builds the reply to this envelope.
    ///
    /// The reply is correlated with this message's correlation identifier, or
    /// with its identifier when it has none.
    pub fn for_reply<M: Message>(&self, reply: &M) -> Result<Self, serde_json::Error> {
        let correlation = self.correlation_id.clone().unwrap_or_else(|| self.id.clone());
        Ok(Self::builder_for(reply)?
            .intent(MessageIntent::Reply)
            .correlation_id(correlation)
            .build())
    }

    /// Deserializes the body as `M`.
    pub fn decode<M: Message>(&self) -> Result<M, ProcessingFailure> {
        serde_json::from_slice(&self.body).map_err(ProcessingFailure::Deserialization)
    }
}

/// Assembles a [`MessageEnvelope`].
///
/// [`build`](EnvelopeBuilder::build) writes the well-known headers last, so
/// they always agree with the envelope's fields.
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    id: Option<MessageId>,
    headers: Headers,
    body: Arc<[u8]>,
    message_type: MessageType,
    intent: MessageIntent,
    correlation_id: Option<MessageId>,
    reply_to: Option<Address>,
}

impl EnvelopeBuilder {
    /// Uses a caller-assigned identifier instead of a generated one.
    #[must_use]
    pub fn id(mut self, id: impl Into<MessageId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the intent. Defaults to [`MessageIntent::Send`].
    #[must_use]
    pub const fn intent(mut self, intent: MessageIntent) -> Self {
        self.intent = intent;
        self
    }

    /// Sets the correlation identifier.
    #[must_use]
    pub fn correlation_id(mut self, correlation_id: impl Into<MessageId>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Sets the reply-to address.
    #[must_use]
    pub fn reply_to(mut self, address: Address) -> Self {
        self.reply_to = Some(address);
        self
    }

    /// Adds a custom header.
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// Adds every header in `extra`.
    #[must_use]
    pub fn headers(mut self, extra: Headers) -> Self {
        self.headers.extend(extra.iter());
        self
    }

    /// Finishes the envelope, generating an identifier if none was set.
    #[must_use]
    pub fn build(self) -> MessageEnvelope {
        let id = self.id.unwrap_or_default();
        let mut headers = self.headers;
        headers.insert(headers::MESSAGE_ID, id.as_str());
        headers.insert(headers::MESSAGE_INTENT, self.intent.as_str());
        headers.insert(
            headers::ENCLOSED_MESSAGE_TYPES,
            self.message_type.to_header_value(),
        );
        if let Some(correlation_id) = &self.correlation_id {
            headers.insert(headers::CORRELATION_ID, correlation_id.as_str());
        }
        if let Some(reply_to) = &self.reply_to {
            headers.insert(headers::REPLY_TO_ADDRESS, reply_to.to_string());
        }
        if !headers.contains(headers::TIME_SENT) {
            headers.insert(headers::TIME_SENT, Utc::now().to_rfc3339());
        }
        MessageEnvelope {
            id,
            headers,
            body: self.body,
            message_type: self.message_type,
            intent: self.intent,
            correlation_id: self.correlation_id,
            reply_to: self.reply_to,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ping {
        sequence: u32,
    }

    impl Message for Ping {
        fn message_type() -> MessageType {
            MessageType::new("tests::Ping")
        }
    }

    #[test]
    fn build_mirrors_metadata_into_headers() {
        let envelope = MessageEnvelope::builder_for(&Ping { sequence: 7 })
            .unwrap()
            .id("msg-1")
            .intent(MessageIntent::Send)
            .correlation_id("conversation-9")
            .reply_to(Address::new("sender"))
            .header("custom", "value")
            .build();

        assert_eq!(envelope.header(headers::MESSAGE_ID), Some("msg-1"));
        assert_eq!(envelope.header(headers::MESSAGE_INTENT), Some("Send"));
        assert_eq!(envelope.header(headers::ENCLOSED_MESSAGE_TYPES), Some("tests::Ping"));
        assert_eq!(envelope.header(headers::CORRELATION_ID), Some("conversation-9"));
        assert_eq!(envelope.header(headers::REPLY_TO_ADDRESS), Some("sender"));
        assert_eq!(envelope.header("custom"), Some("value"));
        assert!(envelope.headers().contains(headers::TIME_SENT));
        assert_eq!(envelope.decode::<Ping>().unwrap(), Ping { sequence: 7 });
    }

    #[test]
    fn with_header_leaves_the_original_untouched() {
        let original = MessageEnvelope::from_message(&Ping { sequence: 1 }, MessageIntent::Send).unwrap();
        let next = original.with_header("courier.Retries.Delayed", "1");

        assert!(original.header("courier.Retries.Delayed").is_none());
        assert_eq!(next.header("courier.Retries.Delayed"), Some("1"));
        assert_eq!(next.id(), original.id());
        assert_eq!(next.body(), original.body());
    }

    #[test]
    fn from_transport_round_trips_through_headers() {
        let sent = MessageEnvelope::builder_for(&Ping { sequence: 3 })
            .unwrap()
            .intent(MessageIntent::Publish)
            .reply_to(Address::new("sender").at("host-a"))
            .build();

        let received = MessageEnvelope::from_transport(sent.headers().clone(), sent.body().to_vec()).unwrap();
        assert_eq!(received.id(), sent.id());
        assert_eq!(received.intent(), MessageIntent::Publish);
        assert_eq!(received.message_type().name(), "tests::Ping");
        assert_eq!(received.reply_to(), sent.reply_to());
    }

    #[test]
    fn from_transport_without_identifier_is_fatal() {
        let failure = MessageEnvelope::from_transport(Headers::new(), Vec::new()).unwrap_err();
        assert_eq!(failure.kind(), crate::common::FailureKind::Fatal);
    }

    #[test]
    fn replies_correlate_with_the_request() {
        let request = MessageEnvelope::builder_for(&Ping { sequence: 1 })
            .unwrap()
            .id("req-1")
            .build();
        let reply = request.for_reply(&Ping { sequence: 2 }).unwrap();

        assert_eq!(reply.intent(), MessageIntent::Reply);
        assert_eq!(reply.correlation_id(), Some(&MessageId::from("req-1")));
        assert_ne!(reply.id(), request.id());
    }

    #[test]
    fn undecodable_body_is_fatal() {
        let envelope = MessageEnvelope::builder(MessageType::new("tests::Ping"), b"not json".to_vec()).build();
        let failure = envelope.decode::<Ping>().unwrap_err();
        assert_eq!(failure.kind(), crate::common::FailureKind::Fatal);
    }
}
