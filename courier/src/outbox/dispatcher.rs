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

use tracing::{debug, info, instrument, warn};

use crate::common::{OutboxError, ProcessingFailure};
use crate::message::MessageId;
use crate::outbox::{OutboxRecord, OutboxStorage, OutboxTransaction};
use crate::routing::RoutedMessage;
use crate::transport::Transport;

/// Deduplication and deferred dispatch over an [`OutboxStorage`].
#[derive(Clone)]
pub struct Outbox {
    storage: Arc<dyn OutboxStorage>,
    transport: Arc<dyn Transport>,
}

impl Outbox {
    /// Creates an outbox that persists to `storage` and dispatches through `transport`.
    pub fn new(storage: Arc<dyn OutboxStorage>, transport: Arc<dyn Transport>) -> Self {
        Self { storage, transport }
    }

    /// Returns the committed record when `message_id` was already processed.
    pub async fn try_deduplicate(&self, message_id: &MessageId) -> Result<Option<OutboxRecord>, OutboxError> {
        self.storage.get(message_id).await
    }

    /// Opens the unit of work handlers enlist their side effects into.
    pub async fn begin(&self, message_id: &MessageId) -> Result<OutboxTransaction, OutboxError> {
        self.storage.begin(message_id).await
    }

    /// Atomically marks the transaction's message as processed, stores
    /// `operations` with it, and applies the enlisted side effects.
    #[instrument(skip_all, fields(message_id = %transaction.message_id(), outgoing = operations.len()))]
    pub async fn store(
        &self,
        transaction: OutboxTransaction,
        operations: Vec<RoutedMessage>,
    ) -> Result<(), OutboxError> {
        let record = OutboxRecord::new(transaction.message_id().clone(), operations);
        self.storage.commit(transaction, record).await?;
        debug!("outbox record committed");
        Ok(())
    }

    /// Dispatches the stored operations of `message_id` unless that already happened.
    pub async fn dispatch(&self, message_id: &MessageId) -> Result<(), ProcessingFailure> {
        let record = self
            .storage
            .get(message_id)
            .await?
            .ok_or_else(|| OutboxError::RecordNotFound(message_id.clone()))?;
        self.dispatch_record(&record).await
    }

    /// Dispatches every operation of `record` and marks it dispatched.
    ///
    /// A record that is already dispatched is left alone. If any operation
    /// fails, the record stays undispatched and the whole set is sent again
    /// on the next attempt.
    #[instrument(skip_all, fields(message_id = %record.message_id, outgoing = record.operations.len()))]
    pub async fn dispatch_record(&self, record: &OutboxRecord) -> Result<(), ProcessingFailure> {
        if record.dispatched {
            debug!("outbox record already dispatched");
            return Ok(());
        }
        for operation in &record.operations {
            self.transport
                .dispatch(&operation.destination, operation.envelope.clone())
                .await?;
        }
        self.storage.mark_dispatched(&record.message_id).await?;
        debug!("outbox record dispatched");
        Ok(())
    }

    /// Resumes dispatch of every committed but undispatched record.
    ///
    /// Returns how many records were completed.
    pub async fn recover(&self) -> Result<usize, OutboxError> {
        let pending = self.storage.undispatched().await?;
        let mut recovered = 0;
        for record in &pending {
            match self.dispatch_record(record).await {
                Ok(()) => recovered += 1,
                Err(error) => {
                    warn!(message_id = %record.message_id, %error, "outbox recovery dispatch failed");
                }
            }
        }
        if recovered > 0 {
            info!(recovered, "outbox recovery dispatched pending records");
        }
        Ok(recovered)
    }
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("local_address", self.transport.local_address())
            .finish_non_exhaustive()
    }
}
