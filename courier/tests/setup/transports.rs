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
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use courier::common::TransportError;
use courier::prelude::*;

/// Counts dispatches before handing them to the wrapped transport.
pub struct CountingTransport {
    inner: InMemoryTransport,
    pub dispatches: Arc<AtomicU32>,
}

impl CountingTransport {
    pub fn new(inner: InMemoryTransport) -> Self {
        Self {
            inner,
            dispatches: Arc::default(),
        }
    }
}

#[async_trait]
impl Transport for CountingTransport {
    fn local_address(&self) -> &Address {
        self.inner.local_address()
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<MessageEnvelope>, TransportError> {
        self.inner.receive(timeout).await
    }

    async fn dispatch(&self, destination: &Address, envelope: MessageEnvelope) -> Result<(), TransportError> {
        self.dispatches.fetch_add(1, Ordering::SeqCst);
        self.inner.dispatch(destination, envelope).await
    }

    async fn request_delayed_redelivery(
        &self,
        envelope: MessageEnvelope,
        delay: Duration,
    ) -> Result<(), TransportError> {
        self.inner.request_delayed_redelivery(envelope, delay).await
    }
}
