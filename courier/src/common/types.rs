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

//! Type aliases for the callbacks shared between modules.

use std::sync::Arc;
use std::time::Duration;

use crate::common::ProcessingFailure;
use crate::pipeline::PipelineBuilder;
use crate::subscriptions::Subscription;

/// Maps a 1-based delayed-retry attempt to the wait before redelivery.
pub type DelayFn = Arc<dyn Fn(u32) -> Duration + Send + Sync + 'static>;

/// Returns `true` when a failure should skip every retry.
pub type UnrecoverablePredicate = Arc<dyn Fn(&ProcessingFailure) -> bool + Send + Sync + 'static>;

/// Invoked after a subscription is stored for the first time.
pub type SubscribedCallback = Arc<dyn Fn(&Subscription) + Send + Sync + 'static>;

/// A side effect enlisted in an outbox transaction, applied when it commits.
pub type EnlistedOperation = Box<dyn FnOnce() + Send + 'static>;

/// Adjusts a pipeline's composition before it is built.
pub type PipelineCustomization = Box<dyn FnOnce(PipelineBuilder) -> PipelineBuilder + Send + 'static>;
