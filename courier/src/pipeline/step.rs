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
use futures::future::BoxFuture;
use tracing::trace;

use crate::common::ProcessingFailure;
use crate::pipeline::{ProcessingContext, Stage};

/// One named unit of behavior in a pipeline.
///
/// A step either calls [`Next::run`] to continue the chain, returns `Ok(())`
/// without calling it to short-circuit, or returns an error. Errors propagate
/// to the caller unchanged.
#[async_trait]
pub trait PipelineStep: Send + Sync + 'static {
    /// Unique name within its pipeline; used as the anchor for
    /// `register_before`/`register_after`.
    fn name(&self) -> &str;

    /// The pipeline this step may be registered in.
    fn stage(&self) -> Stage;

    /// Runs the step.
    async fn process(
        &self,
        ctx: &mut ProcessingContext,
        next: Next<'_>,
    ) -> Result<(), ProcessingFailure>;
}

/// The action at the end of a pipeline: handler invocation for incoming
/// messages, routing and dispatch for outgoing ones.
#[async_trait]
pub trait PipelineTerminal: Send + Sync + 'static {
    /// Completes the run.
    async fn complete(&self, ctx: &mut ProcessingContext) -> Result<(), ProcessingFailure>;
}

/// The rest of the chain after the current step.
pub struct Next<'a> {
    steps: &'a [Arc<dyn PipelineStep>],
    terminal: &'a dyn PipelineTerminal,
}

impl<'a> Next<'a> {
    pub(crate) fn new(steps: &'a [Arc<dyn PipelineStep>], terminal: &'a dyn PipelineTerminal) -> Self {
        Self { steps, terminal }
    }

    /// Number of steps still to run, not counting the terminal.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.steps.len()
    }

    /// Continues the chain.
    ///
    /// Cancellation is observed here, between steps: once the context's token
    /// is cancelled no further step or terminal starts and the run fails with
    /// [`ProcessingFailure::Cancelled`].
    pub fn run<'c>(self, ctx: &'c mut ProcessingContext) -> BoxFuture<'c, Result<(), ProcessingFailure>>
    where
        'a: 'c,
    {
        Box::pin(async move {
            if ctx.is_cancelled() {
                trace!(message_id = %ctx.envelope().id(), "pipeline cancelled at step boundary");
                return Err(ProcessingFailure::Cancelled);
            }
            match self.steps.split_first() {
                Some((step, rest)) => {
                    trace!(step = step.name(), message_id = %ctx.envelope().id(), "entering step");
                    step.process(ctx, Next::new(rest, self.terminal)).await
                }
                None => self.terminal.complete(ctx).await,
            }
        })
    }
}

impl std::fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.steps.len())
            .finish()
    }
}
