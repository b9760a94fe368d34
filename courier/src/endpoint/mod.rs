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

//! The endpoint: handler registration, startup, and the receive loop.
//!
//! An [`EndpointBuilder`] collects handlers, routes and collaborators and
//! composes both pipelines once. [`EndpointBuilder::start`] returns a running
//! [`Endpoint`] that receives from its transport until shut down.

pub use builder::EndpointBuilder;
pub use context::HandlerContext;
pub use handler::{HandlerRegistry, MessageHandler};
pub use options::{PublishOptions, SendOptions};
pub use runtime::Endpoint;
pub use session::BusSession;
pub use terminals::{OriginatingEndpointStep, ORIGINATING_ENDPOINT_STEP};

mod builder;
mod context;
mod handler;
mod options;
mod runtime;
mod session;
mod terminals;
