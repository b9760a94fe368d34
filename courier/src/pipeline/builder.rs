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

use tracing::{debug, instrument};

use crate::common::{PipelineError, ProcessingFailure};
use crate::pipeline::{Next, PipelineStep, PipelineTerminal, ProcessingContext, Stage};

/// Composes the ordered steps of one pipeline.
///
/// Composition errors (a duplicate name, an unknown anchor, a step declared
/// for the other stage) are remembered and reported by
/// [`build`](Self::build), so registrations can be chained.
pub struct PipelineBuilder {
    stage: Stage,
    steps: Vec<Arc<dyn PipelineStep>>,
    error: Option<PipelineError>,
}

impl PipelineBuilder {
    /// Starts an empty pipeline for `stage`.
    #[must_use]
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            steps: Vec::new(),
            error: None,
        }
    }

    /// Appends `step` to the end of the chain.
    #[must_use]
    pub fn register(mut self, step: impl PipelineStep) -> Self {
        let step: Arc<dyn PipelineStep> = Arc::new(step);
        if self.accepts(&step) {
            self.steps.push(step);
        }
        self
    }

    /// Inserts `step` immediately before the step named `existing`.
    #[must_use]
    pub fn register_before(mut self, existing: &str, step: impl PipelineStep) -> Self {
        let step: Arc<dyn PipelineStep> = Arc::new(step);
        if let Some(index) = self.anchor(existing) {
            if self.accepts(&step) {
                self.steps.insert(index, step);
            }
        }
        self
    }

    /// Inserts `step` immediately after the step named `existing`.
    #[must_use]
    pub fn register_after(mut self, existing: &str, step: impl PipelineStep) -> Self {
        let step: Arc<dyn PipelineStep> = Arc::new(step);
        if let Some(index) = self.anchor(existing) {
            if self.accepts(&step) {
                self.steps.insert(index + 1, step);
            }
        }
        self
    }

    /// Swaps the step named `existing` for `step`, keeping its position.
    #[must_use]
    pub fn replace(mut self, existing: &str, step: impl PipelineStep) -> Self {
        let step: Arc<dyn PipelineStep> = Arc::new(step);
        if let Some(index) = self.anchor(existing) {
            if step.stage() != self.stage {
                self.fail(self.mismatch(&step));
            } else if step.name() != existing && self.position(step.name()).is_some() {
                self.fail(PipelineError::DuplicateStep(step.name().to_string()));
            } else {
                self.steps[index] = step;
            }
        }
        self
    }

    /// Drops the step named `existing`.
    #[must_use]
    pub fn remove(mut self, existing: &str) -> Self {
        if let Some(index) = self.anchor(existing) {
            self.steps.remove(index);
        }
        self
    }

    /// Names of the registered steps, in execution order.
    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    /// Freezes the chain into an immutable [`Pipeline`] ending in `terminal`.
    pub fn build(self, terminal: Arc<dyn PipelineTerminal>) -> Result<Pipeline, PipelineError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        debug!(stage = %self.stage, steps = ?self.step_names(), "pipeline composed");
        Ok(Pipeline {
            stage: self.stage,
            steps: Arc::from(self.steps),
            terminal,
        })
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.name() == name)
    }

    fn anchor(&mut self, name: &str) -> Option<usize> {
        let index = self.position(name);
        if index.is_none() {
            self.fail(PipelineError::UnknownStep(name.to_string()));
        }
        index
    }

    fn accepts(&mut self, step: &Arc<dyn PipelineStep>) -> bool {
        if step.stage() != self.stage {
            self.fail(self.mismatch(step));
            return false;
        }
        if self.position(step.name()).is_some() {
            self.fail(PipelineError::DuplicateStep(step.name().to_string()));
            return false;
        }
        true
    }

    fn mismatch(&self, step: &Arc<dyn PipelineStep>) -> PipelineError {
        PipelineError::StageMismatch {
            step: step.name().to_string(),
            declared: step.stage().to_string(),
            pipeline: self.stage.to_string(),
        }
    }

    fn fail(&mut self, error: PipelineError) {
        self.error.get_or_insert(error);
    }
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("stage", &self.stage)
            .field("steps", &self.step_names())
            .field("error", &self.error)
            .finish()
    }
}

/// An immutable, composed chain of steps plus its terminal.
///
/// Cloning is cheap and clones share the same steps. A pipeline holds no
/// per-message state, so one instance serves every concurrent run.
#[derive(Clone)]
pub struct Pipeline {
    stage: Stage,
    steps: Arc<[Arc<dyn PipelineStep>]>,
    terminal: Arc<dyn PipelineTerminal>,
}

impl Pipeline {
    /// The stage this pipeline runs in.
    #[inline]
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Names of the steps, in execution order.
    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    /// Runs every step and then the terminal against `ctx`.
    #[instrument(skip_all, fields(stage = %self.stage, message_id = %ctx.envelope().id()))]
    pub async fn invoke(&self, ctx: &mut ProcessingContext) -> Result<(), ProcessingFailure> {
        Next::new(&self.steps, self.terminal.as_ref()).run(ctx).await
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stage", &self.stage)
            .field("steps", &self.step_names())
            .finish_non_exhaustive()
    }
}
