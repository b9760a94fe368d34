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
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::common::TransportError;
use crate::message::{Address, MessageEnvelope};
use crate::transport::Transport;

#[derive(Debug, Clone)]
struct Queue {
    sender: UnboundedSender<MessageEnvelope>,
    receiver: Arc<Mutex<UnboundedReceiver<MessageEnvelope>>>,
}

impl Queue {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
        }
    }
}

/// A set of in-process queues, one per address, shared by every
/// [`InMemoryTransport`] created from it.
///
/// Unqualified addresses are treated as local to the network's machine, so
/// `orders` and `orders@localhost` name the same queue.
#[derive(Debug, Clone)]
pub struct InMemoryNetwork {
    machine: Arc<str>,
    queues: Arc<DashMap<Address, Queue>>,
}

impl Default for InMemoryNetwork {
    fn default() -> Self {
        Self::with_machine("localhost")
    }
}

impl InMemoryNetwork {
    /// Creates a network whose machine is `localhost`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a network whose unqualified addresses resolve to `machine`.
    pub fn with_machine(machine: impl Into<Arc<str>>) -> Self {
        Self {
            machine: machine.into(),
            queues: Arc::default(),
        }
    }

    /// The machine unqualified addresses resolve to.
    #[must_use]
    pub fn machine(&self) -> &str {
        &self.machine
    }

    /// A transport whose input queue is `local`.
    #[must_use]
    pub fn transport(&self, local: Address) -> InMemoryTransport {
        let local = self.qualify(&local);
        self.queue(&local);
        InMemoryTransport {
            network: self.clone(),
            local,
        }
    }

    /// Takes the next message waiting at `address` without blocking.
    ///
    /// Returns `None` when the queue is empty or a receiver currently holds it.
    #[must_use]
    pub fn try_take(&self, address: &Address) -> Option<MessageEnvelope> {
        let queue = self.queue(address);
        let mut receiver = queue.receiver.try_lock().ok()?;
        receiver.try_recv().ok()
    }

    /// Takes every message currently waiting at `address`.
    #[must_use]
    pub fn drain(&self, address: &Address) -> Vec<MessageEnvelope> {
        std::iter::from_fn(|| self.try_take(address)).collect()
    }

    /// Waits up to `timeout` for a message at `address`.
    pub async fn take(&self, address: &Address, timeout: Duration) -> Option<MessageEnvelope> {
        let queue = self.queue(address);
        tokio::time::timeout(timeout, async move {
            let mut receiver = queue.receiver.lock().await;
            receiver.recv().await
        })
        .await
        .ok()
        .flatten()
    }

    fn qualify(&self, address: &Address) -> Address {
        match address.machine() {
            Some(_) => address.clone(),
            None => address.at(self.machine.as_ref()),
        }
    }

    fn queue(&self, address: &Address) -> Queue {
        self.queues
            .entry(self.qualify(address))
            .or_insert_with(Queue::new)
            .clone()
    }

    fn deliver(&self, destination: &Address, envelope: MessageEnvelope) -> Result<(), TransportError> {
        let queue = self.queue(destination);
        queue
            .sender
            .send(envelope)
            .map_err(|_| TransportError::QueueClosed(destination.to_string()))
    }
}

/// One endpoint's view of an [`InMemoryNetwork`].
#[derive(Debug, Clone)]
pub struct InMemoryTransport {
    network: InMemoryNetwork,
    local: Address,
}

impl InMemoryTransport {
    /// The network this transport delivers into.
    #[must_use]
    pub const fn network(&self) -> &InMemoryNetwork {
        &self.network
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn local_address(&self) -> &Address {
        &self.local
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<MessageEnvelope>, TransportError> {
        let queue = self.network.queue(&self.local);
        let received = tokio::time::timeout(timeout, async move {
            let mut receiver = queue.receiver.lock().await;
            receiver.recv().await
        })
        .await;
        match received {
            Ok(Some(envelope)) => {
                trace!(queue = %self.local, message_id = %envelope.id(), "message received");
                Ok(Some(envelope))
            }
            Ok(None) => Err(TransportError::QueueClosed(self.local.to_string())),
            Err(_) => Ok(None),
        }
    }

    async fn dispatch(&self, destination: &Address, envelope: MessageEnvelope) -> Result<(), TransportError> {
        trace!(destination = %destination, message_id = %envelope.id(), "dispatching");
        self.network.deliver(destination, envelope)
    }

    async fn request_delayed_redelivery(
        &self,
        envelope: MessageEnvelope,
        delay: Duration,
    ) -> Result<(), TransportError> {
        if delay.is_zero() {
            return self.network.deliver(&self.local, envelope);
        }
        debug!(message_id = %envelope.id(), ?delay, "scheduling delayed redelivery");
        let network = self.network.clone();
        let local = self.local.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(error) = network.deliver(&local, envelope) {
                warn!(%error, "delayed redelivery failed");
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;

    fn envelope() -> MessageEnvelope {
        MessageEnvelope::builder(MessageType::new("Ping"), b"{}".to_vec()).build()
    }

    #[tokio::test]
    async fn unqualified_and_local_addresses_share_a_queue() {
        let network = InMemoryNetwork::new();
        let transport = network.transport(Address::new("orders"));
        assert_eq!(transport.local_address().to_string(), "orders@localhost");

        let sent = envelope();
        transport
            .dispatch(&Address::new("orders").at("LOCALHOST"), sent.clone())
            .await
            .unwrap();
        let received = transport
            .receive(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.id(), sent.id());
    }

    #[tokio::test]
    async fn receive_times_out_with_none() {
        let network = InMemoryNetwork::new();
        let transport = network.transport(Address::new("idle"));
        assert!(transport
            .receive(Duration::from_millis(10))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_redelivery_waits_for_the_delay() {
        let network = InMemoryNetwork::new();
        let transport = network.transport(Address::new("orders"));
        transport
            .request_delayed_redelivery(envelope(), Duration::from_secs(30))
            .await
            .unwrap();

        assert!(network.try_take(&Address::new("orders")).is_none());
        let redelivered = transport.receive(Duration::from_secs(31)).await.unwrap();
        assert!(redelivered.is_some());
    }
}
