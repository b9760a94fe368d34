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

//! The behavior pipeline.
//!
//! Every message, incoming or outgoing, runs through an ordered chain of
//! [`PipelineStep`]s that ends in a [`PipelineTerminal`]. The chain is composed
//! once with a [`PipelineBuilder`] and then shared, immutably, by every
//! concurrent run; per-message state lives in the [`ProcessingContext`].

pub use builder::{Pipeline, PipelineBuilder};
pub use context::{ProcessingContext, Stage};
pub use extensions::Extensions;
pub use step::{Next, PipelineStep, PipelineTerminal};

mod builder;
mod context;
mod extensions;
mod step;
