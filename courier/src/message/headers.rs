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

//! Message headers and the well-known header keys the runtime reads and writes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Identifier of the message.
pub const MESSAGE_ID: &str = "courier.MessageId";
/// `Send`, `Publish` or `Reply`.
pub const MESSAGE_INTENT: &str = "courier.MessageIntent";
/// The message type followed by its ancestors, `;`-separated.
pub const ENCLOSED_MESSAGE_TYPES: &str = "courier.EnclosedMessageTypes";
/// Conversation identifier propagated to replies.
pub const CORRELATION_ID: &str = "courier.CorrelationId";
/// Where replies to this message should go.
pub const REPLY_TO_ADDRESS: &str = "courier.ReplyToAddress";
/// RFC 3339 timestamp of the original send.
pub const TIME_SENT: &str = "courier.TimeSent";
/// Address of the endpoint that produced the message.
pub const ORIGINATING_ENDPOINT: &str = "courier.OriginatingEndpoint";

/// Delayed retries already performed. Travels with the message through the transport.
pub const DELAYED_RETRIES: &str = "courier.Retries.Delayed";
/// RFC 3339 timestamp of the most recent delayed retry request.
pub const DELAYED_RETRIES_TIMESTAMP: &str = "courier.Retries.Timestamp";

/// Queue the message failed in.
pub const FAILED_QUEUE: &str = "courier.FailedQ";
/// Endpoint that was processing the message when it failed.
pub const PROCESSING_ENDPOINT: &str = "courier.ProcessingEndpoint";
/// [`FailureKind`](crate::common::FailureKind) of the terminal failure.
pub const EXCEPTION_KIND: &str = "courier.ExceptionInfo.Kind";
/// Description of the terminal failure.
pub const EXCEPTION_MESSAGE: &str = "courier.ExceptionInfo.Message";
/// RFC 3339 timestamp of the terminal failure.
pub const TIME_OF_FAILURE: &str = "courier.TimeOfFailure";
/// Total processing attempts before the message was moved to the error queue.
pub const PROCESSING_ATTEMPTS: &str = "courier.ProcessingAttempts";
/// Immediate retries performed before the message was moved to the error queue.
pub const IMMEDIATE_RETRIES: &str = "courier.Retries.Immediate";

/// String-to-string header map with unique keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    /// Creates an empty header map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// True when `key` is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Inserts or overwrites `key`, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    /// Iterates headers in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for Headers {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        self.0
            .extend(iter.into_iter().map(|(k, v)| (k.into(), v.into())));
    }
}
