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

//! The contract between the runtime and a message transport.
//!
//! The runtime only ever receives, dispatches, and asks for delayed
//! redelivery. Queue polling, broker connections and wire formats belong to
//! the transport implementation.

use std::time::Duration;

use async_trait::async_trait;

use crate::common::TransportError;
use crate::message::{Address, MessageEnvelope};

pub use in_memory::{InMemoryNetwork, InMemoryTransport};

mod in_memory;

/// A message transport as seen by one endpoint.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The endpoint's own input queue. Used as the reply-to address of
    /// outgoing messages and as the target of delayed redelivery.
    fn local_address(&self) -> &Address;

    /// Waits up to `timeout` for the next message. `Ok(None)` means the
    /// timeout elapsed with nothing to deliver.
    async fn receive(&self, timeout: Duration) -> Result<Option<MessageEnvelope>, TransportError>;

    /// Hands `envelope` to the transport for delivery to `destination`.
    async fn dispatch(&self, destination: &Address, envelope: MessageEnvelope) -> Result<(), TransportError>;

    /// Redelivers `envelope` to this endpoint after `delay`.
    async fn request_delayed_redelivery(
        &self,
        envelope: MessageEnvelope,
        delay: Duration,
    ) -> Result<(), TransportError>;
}
