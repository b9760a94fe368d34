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

use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::common::{CourierError, ProcessingFailure};
use crate::message::{Address, EnvelopeBuilder, Message, MessageEnvelope, MessageIntent};
use crate::outbox::PendingOperations;
use crate::pipeline::{Extensions, Pipeline, ProcessingContext};

/// The outgoing side of an endpoint: builds envelopes and runs them through
/// the outgoing pipeline.
#[derive(Debug, Clone)]
pub struct BusSession {
    outgoing: Pipeline,
    local_address: Address,
    cancellation_token: CancellationToken,
}

impl BusSession {
    pub(crate) fn new(outgoing: Pipeline, local_address: Address, cancellation_token: CancellationToken) -> Self {
        Self {
            outgoing,
            local_address,
            cancellation_token,
        }
    }

    /// The endpoint's own address, stamped as reply-to on sends and publishes.
    #[inline]
    #[must_use]
    pub const fn local_address(&self) -> &Address {
        &self.local_address
    }

    /// The composed outgoing pipeline.
    #[inline]
    #[must_use]
    pub const fn outgoing_pipeline(&self) -> &Pipeline {
        &self.outgoing
    }

    /// True once the endpoint has cancelled in-flight work.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Serializes `message` into a builder with `intent` and this endpoint as reply-to.
    pub(crate) fn envelope_for<M: Message>(
        &self,
        message: &M,
        intent: MessageIntent,
    ) -> Result<EnvelopeBuilder, CourierError> {
        let builder = MessageEnvelope::builder_for(message)?.intent(intent);
        Ok(match intent {
            MessageIntent::Reply => builder,
            MessageIntent::Send | MessageIntent::Publish => builder.reply_to(self.local_address.clone()),
        })
    }

    /// Runs `envelope` through the outgoing pipeline.
    ///
    /// When `extensions` holds [`PendingOperations`], routed messages are
    /// staged there instead of being dispatched.
    #[instrument(skip_all, fields(message_id = %envelope.id(), intent = %envelope.intent()))]
    pub(crate) async fn dispatch(
        &self,
        envelope: MessageEnvelope,
        destination: Option<Address>,
        extensions: &mut Extensions,
    ) -> Result<(), ProcessingFailure> {
        let mut ctx = ProcessingContext::outgoing(envelope, destination, self.cancellation_token.clone());
        if let Some(pending) = extensions.remove::<PendingOperations>() {
            ctx.extensions_mut().insert(pending);
        }
        let result = self.outgoing.invoke(&mut ctx).await;
        if let Some(pending) = ctx.extensions_mut().remove::<PendingOperations>() {
            extensions.insert(pending);
        }
        result
    }
}
