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

use async_trait::async_trait;
use tracing::{debug, info};

use crate::common::{OutboxError, ProcessingFailure};
use crate::outbox::{Outbox, OutboxTransaction};
use crate::pipeline::{Next, PipelineStep, ProcessingContext, Stage};
use crate::routing::RoutedMessage;
use crate::transport::Transport;

/// Outgoing messages produced while an incoming message is handled, held back
/// until handling succeeds.
///
/// While this extension is present on a context, the outgoing pipeline's
/// terminal appends routed messages here instead of dispatching them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingOperations(Vec<RoutedMessage>);

impl PendingOperations {
    /// Stages `messages`.
    pub fn extend(&mut self, messages: impl IntoIterator<Item = RoutedMessage>) {
        self.0.extend(messages);
    }

    /// Staged messages in the order they were produced.
    pub fn iter(&self) -> impl Iterator<Item = &RoutedMessage> {
        self.0.iter()
    }

    /// Number of staged messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The staged messages, in the order they were produced.
    #[must_use]
    pub fn into_inner(self) -> Vec<RoutedMessage> {
        self.0
    }
}

/// Name of the incoming step that deduplicates through the outbox.
pub const OUTBOX_STEP: &str = "courier.outbox";

/// Name of the incoming step that holds back outgoing messages until handling succeeds.
pub const BATCHED_DISPATCH_STEP: &str = "courier.batched-dispatch";

/// Runs handlers at most once per message identifier.
///
/// 1. A message whose identifier already has a record is not handled again;
///    its stored outgoing messages are dispatched if that has not happened yet.
/// 2. Otherwise handlers run with outgoing messages buffered and an
///    [`OutboxTransaction`] available in the context.
/// 3. On success the record, the buffered messages and the transaction's side
///    effects commit atomically, and only then are the messages dispatched.
///
/// A concurrent duplicate that loses the commit is treated as already processed.
#[derive(Debug, Clone)]
pub struct OutboxStep {
    outbox: Outbox,
}

impl OutboxStep {
    /// Creates the step.
    #[must_use]
    pub const fn new(outbox: Outbox) -> Self {
        Self { outbox }
    }
}

#[async_trait]
impl PipelineStep for OutboxStep {
    fn name(&self) -> &str {
        OUTBOX_STEP
    }

    fn stage(&self) -> Stage {
        Stage::Incoming
    }

    async fn process(&self, ctx: &mut ProcessingContext, next: Next<'_>) -> Result<(), ProcessingFailure> {
        let message_id = ctx.envelope().id().clone();
        if let Some(record) = self.outbox.try_deduplicate(&message_id).await? {
            info!(
                message_id = %message_id,
                dispatched = record.dispatched,
                "duplicate message, skipping handlers"
            );
            return self.outbox.dispatch_record(&record).await;
        }

        let transaction = self.outbox.begin(&message_id).await?;
        ctx.extensions_mut().insert(PendingOperations::default());
        ctx.extensions_mut().insert(transaction);

        let handled = next.run(ctx).await;
        let pending = ctx
            .extensions_mut()
            .remove::<PendingOperations>()
            .unwrap_or_default();
        let transaction = ctx.extensions_mut().remove::<OutboxTransaction>();
        handled?;

        if ctx.is_cancelled() {
            return Err(ProcessingFailure::Cancelled);
        }
        let transaction = transaction.ok_or_else(|| {
            ProcessingFailure::fatal("outbox transaction was removed from the processing context")
        })?;

        match self.outbox.store(transaction, pending.into_inner()).await {
            Ok(()) => {}
            Err(OutboxError::AlreadyCommitted(_)) => {
                debug!(message_id = %message_id, "concurrent duplicate committed first");
                return Ok(());
            }
            Err(error) => return Err(error.into()),
        }
        self.outbox.dispatch(&message_id).await
    }
}

/// Holds back outgoing messages until the incoming message's handlers
/// succeed, then dispatches them. A failed attempt dispatches nothing.
///
/// Used in place of [`OutboxStep`] when the outbox is disabled.
#[derive(Clone)]
pub struct BatchedDispatchStep {
    transport: Arc<dyn Transport>,
}

impl BatchedDispatchStep {
    /// Creates the step.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl PipelineStep for BatchedDispatchStep {
    fn name(&self) -> &str {
        BATCHED_DISPATCH_STEP
    }

    fn stage(&self) -> Stage {
        Stage::Incoming
    }

    async fn process(&self, ctx: &mut ProcessingContext, next: Next<'_>) -> Result<(), ProcessingFailure> {
        if ctx.extensions().contains::<PendingOperations>() {
            return next.run(ctx).await;
        }
        ctx.extensions_mut().insert(PendingOperations::default());
        let handled = next.run(ctx).await;
        let pending = ctx
            .extensions_mut()
            .remove::<PendingOperations>()
            .unwrap_or_default();
        handled?;
        if ctx.is_cancelled() {
            return Err(ProcessingFailure::Cancelled);
        }

        for routed in pending.into_inner() {
            self.transport
                .dispatch(&routed.destination, routed.envelope)
                .await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for BatchedDispatchStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchedDispatchStep").finish_non_exhaustive()
    }
}
