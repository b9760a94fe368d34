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

use crate::message::{Address, EnvelopeBuilder, Headers, MessageId};

/// Options for a send.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub(crate) destination: Option<Address>,
    pub(crate) message_id: Option<MessageId>,
    pub(crate) correlation_id: Option<MessageId>,
    pub(crate) headers: Headers,
}

impl SendOptions {
    /// Default options: conventional routing and a generated identifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends to `destination` instead of the conventional route.
    #[must_use]
    pub fn with_destination(mut self, destination: Address) -> Self {
        self.destination = Some(destination);
        self
    }

    /// Uses a caller-assigned message identifier.
    #[must_use]
    pub fn with_message_id(mut self, message_id: impl Into<MessageId>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Overrides the conversation the message belongs to.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<MessageId>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Adds an application header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    pub(crate) fn apply(&self, mut builder: EnvelopeBuilder) -> EnvelopeBuilder {
        builder = builder.headers(self.headers.clone());
        if let Some(id) = &self.message_id {
            builder = builder.id(id.clone());
        }
        if let Some(correlation_id) = &self.correlation_id {
            builder = builder.correlation_id(correlation_id.clone());
        }
        builder
    }
}

/// Options for a publish.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub(crate) message_id: Option<MessageId>,
    pub(crate) correlation_id: Option<MessageId>,
    pub(crate) headers: Headers,
}

impl PublishOptions {
    /// Default options with a generated identifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a caller-assigned message identifier.
    #[must_use]
    pub fn with_message_id(mut self, message_id: impl Into<MessageId>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Overrides the conversation the message belongs to.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<MessageId>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Adds an application header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    pub(crate) fn apply(&self, mut builder: EnvelopeBuilder) -> EnvelopeBuilder {
        builder = builder.headers(self.headers.clone());
        if let Some(id) = &self.message_id {
            builder = builder.id(id.clone());
        }
        if let Some(correlation_id) = &self.correlation_id {
            builder = builder.correlation_id(correlation_id.clone());
        }
        builder
    }
}
