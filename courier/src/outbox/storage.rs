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

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use derive_new::new;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::common::{EnlistedOperation, OutboxError};
use crate::message::MessageId;
use crate::routing::RoutedMessage;

/// The outcome of processing one incoming message: the messages it produced
/// and whether they have been handed to the transport.
#[derive(new, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    /// The incoming message this record deduplicates.
    pub message_id: MessageId,
    /// Outgoing messages staged while the incoming message was handled.
    pub operations: Vec<RoutedMessage>,
    /// Set once every operation has been dispatched.
    #[new(value = "false")]
    pub dispatched: bool,
}

/// A unit of work that commits together with an [`OutboxRecord`].
///
/// Handlers enlist their side effects; the storage applies them as part of the
/// same atomic commit that stores the record. A transaction that is dropped
/// without committing applies nothing.
pub struct OutboxTransaction {
    message_id: MessageId,
    operations: Mutex<Vec<EnlistedOperation>>,
}

impl OutboxTransaction {
    /// Opens a transaction for the incoming message `message_id`.
    #[must_use]
    pub fn new(message_id: MessageId) -> Self {
        Self {
            message_id,
            operations: Mutex::default(),
        }
    }

    /// The incoming message this unit of work belongs to.
    #[inline]
    #[must_use]
    pub const fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    /// Adds a side effect to apply on commit.
    pub fn enlist(&self, operation: impl FnOnce() + Send + 'static) {
        self.operations.lock().push(Box::new(operation));
    }

    /// Number of enlisted side effects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.lock().len()
    }

    /// True when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.lock().is_empty()
    }

    /// Consumes the transaction, returning its side effects in enlistment order.
    #[must_use]
    pub fn into_operations(self) -> Vec<EnlistedOperation> {
        self.operations.into_inner()
    }
}

impl std::fmt::Debug for OutboxTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxTransaction")
            .field("message_id", &self.message_id)
            .field("operations", &self.len())
            .finish()
    }
}

/// Persistence for outbox records.
///
/// `commit` must be a single atomic compare-and-set: the record is stored, and
/// the transaction's side effects applied, only if no record exists yet for
/// the message.
#[async_trait]
pub trait OutboxStorage: Send + Sync + 'static {
    /// The record for `message_id`, if one was committed.
    async fn get(&self, message_id: &MessageId) -> Result<Option<OutboxRecord>, OutboxError>;

    /// Opens a unit of work for `message_id`.
    async fn begin(&self, message_id: &MessageId) -> Result<OutboxTransaction, OutboxError>;

    /// Atomically stores `record` and applies `transaction`.
    ///
    /// Fails with [`OutboxError::AlreadyCommitted`] when a record for the same
    /// message already exists; nothing is applied in that case.
    async fn commit(&self, transaction: OutboxTransaction, record: OutboxRecord) -> Result<(), OutboxError>;

    /// Flags the record for `message_id` as dispatched.
    async fn mark_dispatched(&self, message_id: &MessageId) -> Result<(), OutboxError>;

    /// Every committed record not yet dispatched.
    async fn undispatched(&self) -> Result<Vec<OutboxRecord>, OutboxError>;
}

/// Outbox storage kept in process memory. Clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOutboxStorage {
    records: Arc<Mutex<HashMap<MessageId, OutboxRecord>>>,
}

impl InMemoryOutboxStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// True when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl OutboxStorage for InMemoryOutboxStorage {
    async fn get(&self, message_id: &MessageId) -> Result<Option<OutboxRecord>, OutboxError> {
        Ok(self.records.lock().get(message_id).cloned())
    }

    async fn begin(&self, message_id: &MessageId) -> Result<OutboxTransaction, OutboxError> {
        Ok(OutboxTransaction::new(message_id.clone()))
    }

    async fn commit(&self, transaction: OutboxTransaction, record: OutboxRecord) -> Result<(), OutboxError> {
        let mut records = self.records.lock();
        if records.contains_key(&record.message_id) {
            return Err(OutboxError::AlreadyCommitted(record.message_id));
        }
        let operations = transaction.into_operations();
        trace!(
            message_id = %record.message_id,
            outgoing = record.operations.len(),
            side_effects = operations.len(),
            "committing outbox record"
        );
        for operation in operations {
            operation();
        }
        records.insert(record.message_id.clone(), record);
        Ok(())
    }

    async fn mark_dispatched(&self, message_id: &MessageId) -> Result<(), OutboxError> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(message_id)
            .ok_or_else(|| OutboxError::RecordNotFound(message_id.clone()))?;
        record.dispatched = true;
        Ok(())
    }

    async fn undispatched(&self) -> Result<Vec<OutboxRecord>, OutboxError> {
        Ok(self
            .records
            .lock()
            .values()
            .filter(|record| !record.dispatched)
            .cloned()
            .collect())
    }
}
