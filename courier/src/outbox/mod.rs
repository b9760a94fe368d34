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

//! The outbox: effectively-once handling over an at-least-once transport.
//!
//! Handlers of a message run at most once per message identifier. The
//! messages they produce are committed together with the "processed" mark and
//! dispatched afterwards, so a crash between commit and dispatch is repaired
//! by replaying the stored messages rather than re-running handlers.

pub use dispatcher::Outbox;
pub use step::{BatchedDispatchStep, OutboxStep, PendingOperations, BATCHED_DISPATCH_STEP, OUTBOX_STEP};
pub use storage::{InMemoryOutboxStorage, OutboxRecord, OutboxStorage, OutboxTransaction};

mod dispatcher;
mod step;
mod storage;
