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

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Courier
//!
//! A transport-agnostic message-bus runtime built on Tokio.
//!
//! ## Key Concepts
//!
//! - **Envelopes (`MessageEnvelope`)**: an immutable message body plus the
//!   headers that travel with it. Every hop produces a new envelope.
//! - **Pipelines**: incoming and outgoing messages run through an ordered
//!   chain of steps. Steps can be inserted, replaced or removed when the
//!   endpoint is built.
//! - **Routing**: sends go to an explicit or conventional destination,
//!   publishes go to every subscriber of the message type or one of its
//!   supertypes, replies go back to the sender.
//! - **Recoverability**: failed messages are retried immediately, then with
//!   a growing delay, then moved to an error queue with diagnostic headers.
//! - **Outbox**: handlers run at most once per message identifier and the
//!   messages they produce are dispatched only after the work commits.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use courier::prelude::*;
//!
//! #[courier_message(name = "Billing.OrderPlaced", event)]
//! struct OrderPlaced {
//!     order_id: u64,
//! }
//!
//! struct Bill;
//!
//! #[async_trait]
//! impl MessageHandler<OrderPlaced> for Bill {
//!     async fn handle(&self, message: OrderPlaced, ctx: &mut HandlerContext) -> anyhow::Result<()> {
//!         tracing::info!(order_id = message.order_id, "billing");
//!         Ok(())
//!     }
//! }
//!
//! let network = InMemoryNetwork::new();
//! let endpoint = EndpointBuilder::default()
//!     .transport(network.transport(Address::new("billing")))
//!     .handle::<OrderPlaced, _>(Bill)
//!     .start()
//!     .await?;
//! endpoint.publish(&OrderPlaced { order_id: 7 }).await?;
//! endpoint.shutdown().await?;
//! ```

extern crate self as courier;

/// Configuration, the error taxonomy and shared type aliases.
pub mod common;

/// Endpoint builder, handlers and the running endpoint.
pub mod endpoint;

/// Message identity, addresses, headers and envelopes.
pub mod message;

/// Effectively-once handling through an outbox.
pub mod outbox;

/// Ordered processing pipelines and their per-message context.
pub mod pipeline;

/// Retry classification, delay policies and the retry state machine.
pub mod recoverability;

/// Destination resolution for sends, publishes and replies.
pub mod routing;

/// Which endpoints subscribe to which message types.
pub mod subscriptions;

/// The transport contract and an in-process implementation.
pub mod transport;

#[doc(hidden)]
pub use serde;

/// A prelude module for conveniently importing the most commonly used items.
///
/// ## Macros
/// *   [`courier_macro::courier_message`]: Attribute macro for defining messages.
///
/// ## External Crates
/// *   [`async_trait::async_trait`]: The macro for implementing handlers and steps.
///
/// ## Core Types
/// *   [`crate::endpoint::EndpointBuilder`] and [`crate::endpoint::Endpoint`].
/// *   [`crate::endpoint::MessageHandler`] and [`crate::endpoint::HandlerContext`].
/// *   [`crate::message::MessageEnvelope`], [`crate::message::Address`] and friends.
/// *   [`crate::pipeline::PipelineStep`] and the types a step implementation touches.
pub mod prelude {
    pub use async_trait::async_trait;
    pub use courier_macro::courier_message;

    pub use crate::common::{CourierConfig, CourierError, FailureKind, ProcessingFailure};
    pub use crate::endpoint::{
        Endpoint, EndpointBuilder, HandlerContext, MessageHandler, PublishOptions, SendOptions,
    };
    pub use crate::message::{
        message_type_of, Address, Headers, Message, MessageEnvelope, MessageId, MessageIntent,
        MessageType,
    };
    pub use crate::pipeline::{Next, PipelineBuilder, PipelineStep, ProcessingContext, Stage};
    pub use crate::recoverability::DelayPolicy;
    pub use crate::transport::{InMemoryNetwork, InMemoryTransport, Transport};
}
