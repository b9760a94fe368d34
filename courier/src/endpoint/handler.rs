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
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::common::ProcessingFailure;
use crate::endpoint::HandlerContext;
use crate::message::{message_type_of, Message, MessageEnvelope, MessageType};

/// Application logic for messages of type `M`.
///
/// A handler registered for a supertype also runs for its subtypes; it then
/// receives the subtype's body decoded as `M`.
#[async_trait]
pub trait MessageHandler<M: Message>: Send + Sync + 'static {
    /// Handles one message.
    async fn handle(&self, message: M, ctx: &mut HandlerContext) -> anyhow::Result<()>;
}

#[async_trait]
pub(crate) trait ErasedHandler: Send + Sync + 'static {
    async fn handle(&self, envelope: &MessageEnvelope, ctx: &mut HandlerContext) -> Result<(), ProcessingFailure>;
}

struct TypedHandler<M, H> {
    handler: H,
    _message: PhantomData<fn() -> M>,
}

#[async_trait]
impl<M, H> ErasedHandler for TypedHandler<M, H>
where
    M: Message,
    H: MessageHandler<M>,
{
    async fn handle(&self, envelope: &MessageEnvelope, ctx: &mut HandlerContext) -> Result<(), ProcessingFailure> {
        let message = envelope.decode::<M>()?;
        self.handler
            .handle(message, ctx)
            .await
            .map_err(ProcessingFailure::from_handler_error)
    }
}

/// Handlers by message type name, in registration order.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Vec<Arc<dyn ErasedHandler>>>,
    message_types: Vec<MessageType>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `handler` for messages of type `M`.
    pub fn register<M, H>(&mut self, handler: H)
    where
        M: Message,
        H: MessageHandler<M>,
    {
        let message_type = message_type_of::<M>();
        trace!(message_type = %message_type, "handler registered");
        if !self.message_types.contains(&message_type) {
            self.message_types.push(message_type.clone());
        }
        self.handlers
            .entry(message_type.name().to_string())
            .or_default()
            .push(Arc::new(TypedHandler {
                handler,
                _message: PhantomData,
            }));
    }

    /// The handled message types, in first-registration order.
    #[must_use]
    pub fn message_types(&self) -> &[MessageType] {
        &self.message_types
    }

    /// True when some handler runs for `message_type`.
    #[must_use]
    pub fn handles(&self, message_type: &MessageType) -> bool {
        message_type
            .lineage()
            .any(|name| self.handlers.contains_key(name))
    }

    /// Handlers for `message_type`: its own first, then each ancestor's, each
    /// group in registration order.
    pub(crate) fn handlers_for(&self, message_type: &MessageType) -> Vec<Arc<dyn ErasedHandler>> {
        message_type
            .lineage()
            .filter_map(|name| self.handlers.get(name))
            .flatten()
            .cloned()
            .collect()
    }

    /// Total number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    /// True when no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("message_types", &self.message_types)
            .field("handlers", &self.len())
            .finish()
    }
}
