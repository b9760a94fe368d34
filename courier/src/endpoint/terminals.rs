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

//! The built-in ends of the incoming and outgoing pipelines.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::common::ProcessingFailure;
use crate::endpoint::{BusSession, HandlerContext, HandlerRegistry};
use crate::message::{headers, Address};
use crate::outbox::PendingOperations;
use crate::pipeline::{Next, PipelineStep, PipelineTerminal, ProcessingContext, Stage};
use crate::routing::{DispatchRouter, OutgoingMessage};
use crate::transport::Transport;

/// Name of the outgoing step that stamps the originating endpoint.
pub const ORIGINATING_ENDPOINT_STEP: &str = "courier.originating-endpoint";

/// Invokes every handler registered for the incoming message's type and its
/// ancestors, in registration order, stopping at the first failure.
pub(crate) struct InvokeHandlers {
    handlers: Arc<HandlerRegistry>,
    session: BusSession,
}

impl InvokeHandlers {
    pub(crate) fn new(handlers: Arc<HandlerRegistry>, session: BusSession) -> Self {
        Self { handlers, session }
    }
}

#[async_trait]
impl PipelineTerminal for InvokeHandlers {
    async fn complete(&self, ctx: &mut ProcessingContext) -> Result<(), ProcessingFailure> {
        let envelope = ctx.envelope().clone();
        let handlers = self.handlers.handlers_for(envelope.message_type());
        if handlers.is_empty() {
            return Err(ProcessingFailure::fatal(format!(
                "no handler is registered for message type `{}`",
                envelope.message_type()
            )));
        }

        let mut handler_ctx = HandlerContext::new(envelope.clone(), ctx.take_extensions(), self.session.clone());
        let mut result = Ok(());
        for (index, handler) in handlers.iter().enumerate() {
            if ctx.is_cancelled() {
                result = Err(ProcessingFailure::Cancelled);
                break;
            }
            trace!(handler = index, "invoking handler");
            if let Err(failure) = handler.handle(&envelope, &mut handler_ctx).await {
                result = Err(failure);
                break;
            }
        }
        ctx.restore_extensions(handler_ctx.into_extensions());
        if result.is_ok() {
            debug!(handlers = handlers.len(), "handlers completed");
        }
        result
    }
}

/// Routes an outgoing message and dispatches each destination, or stages the
/// routed messages when the context carries [`PendingOperations`].
pub(crate) struct Dispatch {
    router: DispatchRouter,
    transport: Arc<dyn Transport>,
}

impl Dispatch {
    pub(crate) fn new(router: DispatchRouter, transport: Arc<dyn Transport>) -> Self {
        Self { router, transport }
    }
}

#[async_trait]
impl PipelineTerminal for Dispatch {
    async fn complete(&self, ctx: &mut ProcessingContext) -> Result<(), ProcessingFailure> {
        let outgoing = OutgoingMessage::new(ctx.envelope().clone(), ctx.destination().cloned());
        let routed = self.router.route(&outgoing).await?;
        if let Some(pending) = ctx.extensions_mut().get_mut::<PendingOperations>() {
            trace!(staged = routed.len(), "outgoing messages staged");
            pending.extend(routed);
            return Ok(());
        }
        for message in routed {
            self.transport
                .dispatch(&message.destination, message.envelope)
                .await?;
        }
        Ok(())
    }
}

/// Stamps outgoing messages with the address of the endpoint that produced them.
#[derive(Debug, Clone)]
pub struct OriginatingEndpointStep {
    address: Address,
}

impl OriginatingEndpointStep {
    /// Creates the step for the endpoint at `address`.
    #[must_use]
    pub const fn new(address: Address) -> Self {
        Self { address }
    }
}

#[async_trait]
impl PipelineStep for OriginatingEndpointStep {
    fn name(&self) -> &str {
        ORIGINATING_ENDPOINT_STEP
    }

    fn stage(&self) -> Stage {
        Stage::Outgoing
    }

    async fn process(&self, ctx: &mut ProcessingContext, next: Next<'_>) -> Result<(), ProcessingFailure> {
        if !ctx.envelope().headers().contains(headers::ORIGINATING_ENDPOINT) {
            let stamped = ctx
                .envelope()
                .with_header(headers::ORIGINATING_ENDPOINT, self.address.to_string());
            ctx.set_envelope(stamped);
        }
        next.run(ctx).await
    }
}
