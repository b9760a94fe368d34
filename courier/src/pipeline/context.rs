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

use static_assertions::assert_impl_all;
use tokio_util::sync::CancellationToken;

use crate::message::{Address, MessageEnvelope};
use crate::pipeline::Extensions;

/// Which pipeline a step or context belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Messages received from the transport, ending in handler invocation.
    Incoming,
    /// Messages sent, published or replied, ending in dispatch.
    Outgoing,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Incoming => write!(f, "incoming"),
            Self::Outgoing => write!(f, "outgoing"),
        }
    }
}

/// State owned by a single pipeline run.
///
/// A context is created per message and per attempt and is never shared
/// between concurrent runs. Steps hand each other data through
/// [`extensions`](Self::extensions_mut).
#[derive(Debug)]
pub struct ProcessingContext {
    envelope: MessageEnvelope,
    stage: Stage,
    destination: Option<Address>,
    extensions: Extensions,
    cancellation_token: CancellationToken,
}

impl ProcessingContext {
    /// Context for a message received from the transport.
    #[must_use]
    pub fn incoming(envelope: MessageEnvelope, cancellation_token: CancellationToken) -> Self {
        Self {
            envelope,
            stage: Stage::Incoming,
            destination: None,
            extensions: Extensions::new(),
            cancellation_token,
        }
    }

    /// Context for a message leaving the endpoint.
    ///
    /// `destination` is the explicit destination, if the caller named one.
    #[must_use]
    pub fn outgoing(
        envelope: MessageEnvelope,
        destination: Option<Address>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            envelope,
            stage: Stage::Outgoing,
            destination,
            extensions: Extensions::new(),
            cancellation_token,
        }
    }

    /// Returns the envelope being processed
    #[inline]
    #[must_use]
    pub const fn envelope(&self) -> &MessageEnvelope {
        &self.envelope
    }

    /// Swaps in the envelope for the next hop, typically one produced by
    /// [`MessageEnvelope::with_header`].
    pub fn set_envelope(&mut self, envelope: MessageEnvelope) {
        self.envelope = envelope;
    }

    /// Whether the message is being received or sent.
    #[inline]
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// The explicit destination of an outgoing message
    #[inline]
    #[must_use]
    pub const fn destination(&self) -> Option<&Address> {
        self.destination.as_ref()
    }

    /// Overrides the explicit destination of an outgoing message.
    pub fn set_destination(&mut self, destination: Option<Address>) {
        self.destination = destination;
    }

    /// Values attached by earlier steps.
    #[inline]
    #[must_use]
    pub const fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Mutable access to the attached values.
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Moves the extensions out, leaving an empty set behind.
    pub fn take_extensions(&mut self) -> Extensions {
        std::mem::take(&mut self.extensions)
    }

    /// Puts back extensions previously taken with [`take_extensions`](Self::take_extensions).
    pub fn restore_extensions(&mut self, extensions: Extensions) {
        self.extensions = extensions;
    }

    /// The endpoint-wide cancellation signal.
    #[inline]
    #[must_use]
    pub const fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// True once the endpoint has asked in-flight work to stop.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}

assert_impl_all!(ProcessingContext: Send, Sync);
