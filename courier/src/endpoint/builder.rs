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

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::common::{CourierConfig, CourierError, PipelineCustomization};
use crate::endpoint::runtime::EndpointParts;
use crate::endpoint::terminals::{Dispatch, InvokeHandlers, OriginatingEndpointStep};
use crate::endpoint::{BusSession, Endpoint, HandlerRegistry, MessageHandler};
use crate::message::{message_type_of, Address, Message};
use crate::outbox::{BatchedDispatchStep, InMemoryOutboxStorage, Outbox, OutboxStep, OutboxStorage};
use crate::pipeline::{PipelineBuilder, Stage};
use crate::recoverability::{
    DefaultClassifier, DelayPolicy, FailureClassifier, RecoverabilityConfig, RecoverabilityManager,
};
use crate::routing::{DispatchRouter, RouteTable};
use crate::subscriptions::{InMemorySubscriptionStorage, SubscriptionRegistry, SubscriptionStorage};
use crate::transport::{InMemoryNetwork, Transport};

/// Assembles an endpoint: transport, handlers, routes, storages, pipeline
/// customizations and recoverability policy.
///
/// Anything not set explicitly comes from the [`CourierConfig`] the builder
/// was created with.
pub struct EndpointBuilder {
    config: CourierConfig,
    transport: Option<Arc<dyn Transport>>,
    handlers: HandlerRegistry,
    routes: RouteTable,
    subscription_storage: Option<Arc<dyn SubscriptionStorage>>,
    outbox_storage: Option<Arc<dyn OutboxStorage>>,
    classifier: Option<Arc<dyn FailureClassifier>>,
    recoverability: Option<RecoverabilityConfig>,
    delay_policy: Option<DelayPolicy>,
    incoming: Vec<PipelineCustomization>,
    outgoing: Vec<PipelineCustomization>,
}

impl Default for EndpointBuilder {
    fn default() -> Self {
        Self::with_config(CourierConfig::default())
    }
}

impl EndpointBuilder {
    /// A builder configured from the XDG configuration file, if any.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CourierConfig::load())
    }

    /// A builder configured from `config`.
    #[must_use]
    pub fn with_config(config: CourierConfig) -> Self {
        Self {
            config,
            transport: None,
            handlers: HandlerRegistry::new(),
            routes: RouteTable::new(),
            subscription_storage: None,
            outbox_storage: None,
            classifier: None,
            recoverability: None,
            delay_policy: None,
            incoming: Vec::new(),
            outgoing: Vec::new(),
        }
    }

    /// The configuration the endpoint will start with.
    #[must_use]
    pub const fn config(&self) -> &CourierConfig {
        &self.config
    }

    /// Uses `transport` to receive and dispatch. Required.
    #[must_use]
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Receives from the queue named by `endpoint.name` on `network`.
    #[must_use]
    pub fn in_memory(self, network: &InMemoryNetwork) -> Self {
        let local = Address::new(self.config.endpoint.name.clone());
        self.transport(network.transport(local))
    }

    /// Registers `handler` for messages of type `M`.
    #[must_use]
    pub fn handle<M, H>(mut self, handler: H) -> Self
    where
        M: Message,
        H: MessageHandler<M>,
    {
        self.handlers.register::<M, H>(handler);
        self
    }

    /// Routes sends of `M` (and its subtypes without a route of their own) to `destination`.
    #[must_use]
    pub fn route<M: Message>(mut self, destination: Address) -> Self {
        self.routes
            .insert(message_type_of::<M>().name().to_string(), destination);
        self
    }

    /// Routes sends of the type named `message_type` to `destination`.
    #[must_use]
    pub fn route_type(mut self, message_type: impl Into<String>, destination: Address) -> Self {
        self.routes.insert(message_type, destination);
        self
    }

    /// Stores subscriptions in `storage` instead of process memory.
    #[must_use]
    pub fn subscription_storage(mut self, storage: impl SubscriptionStorage) -> Self {
        self.subscription_storage = Some(Arc::new(storage));
        self
    }

    /// Enables the outbox, persisting to `storage`.
    #[must_use]
    pub fn outbox_storage(mut self, storage: impl OutboxStorage) -> Self {
        self.outbox_storage = Some(Arc::new(storage));
        self.config.outbox.enabled = true;
        self
    }

    /// Enables the outbox with in-memory storage unless storage was already set.
    #[must_use]
    pub fn enable_outbox(mut self) -> Self {
        self.config.outbox.enabled = true;
        self
    }

    /// Replaces the default failure classifier.
    #[must_use]
    pub fn classifier(mut self, classifier: impl FailureClassifier) -> Self {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    /// Overrides the configured retry limits and error queue.
    ///
    /// The processing timeout still comes from the configuration unless
    /// `recoverability` sets one.
    #[must_use]
    pub fn recoverability(mut self, recoverability: RecoverabilityConfig) -> Self {
        self.recoverability = Some(recoverability);
        self
    }

    /// Overrides the delayed-retry delay policy, including a custom one.
    #[must_use]
    pub fn delay_policy(mut self, policy: DelayPolicy) -> Self {
        self.delay_policy = Some(policy);
        self
    }

    /// Maximum number of messages processed at once.
    #[must_use]
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.endpoint.concurrency = concurrency;
        self
    }

    /// Subscribes the endpoint to every handled event type on start. On by default.
    #[must_use]
    pub fn auto_subscribe(mut self, enabled: bool) -> Self {
        self.config.endpoint.auto_subscribe = enabled;
        self
    }

    /// Adjusts the incoming pipeline. The built-in steps are already registered
    /// when `customize` runs, so it can anchor on them.
    #[must_use]
    pub fn configure_incoming(
        mut self,
        customize: impl FnOnce(PipelineBuilder) -> PipelineBuilder + Send + 'static,
    ) -> Self {
        self.incoming.push(Box::new(customize));
        self
    }

    /// Adjusts the outgoing pipeline.
    #[must_use]
    pub fn configure_outgoing(
        mut self,
        customize: impl FnOnce(PipelineBuilder) -> PipelineBuilder + Send + 'static,
    ) -> Self {
        self.outgoing.push(Box::new(customize));
        self
    }

    /// Composes the pipelines and starts receiving.
    #[instrument(skip(self))]
    pub async fn start(self) -> Result<Endpoint, CourierError> {
        let transport = self
            .transport
            .ok_or_else(|| CourierError::Configuration("no transport was configured".to_string()))?;
        let local_address = transport.local_address().clone();
        let processing_token = CancellationToken::new();

        let mut routes = self.config.routing.route_table()?;
        routes.merge(self.routes);
        let mut subscriptions = SubscriptionRegistry::new(
            self.subscription_storage
                .unwrap_or_else(|| Arc::new(InMemorySubscriptionStorage::new()) as Arc<dyn SubscriptionStorage>),
        );
        if let Some(machine) = local_address.machine() {
            subscriptions = subscriptions.with_local_machine(machine);
        }
        let router = DispatchRouter::new(routes, subscriptions.clone());

        let outgoing = self
            .outgoing
            .into_iter()
            .fold(
                PipelineBuilder::new(Stage::Outgoing)
                    .register(OriginatingEndpointStep::new(local_address.clone())),
                |builder, customize| customize(builder),
            )
            .build(Arc::new(Dispatch::new(router, transport.clone())))?;
        let session = BusSession::new(outgoing, local_address.clone(), processing_token.clone());

        let outbox = if self.config.outbox.enabled {
            let storage = self
                .outbox_storage
                .unwrap_or_else(|| Arc::new(InMemoryOutboxStorage::new()) as Arc<dyn OutboxStorage>);
            Some(Outbox::new(storage, transport.clone()))
        } else {
            None
        };
        let first_step = PipelineBuilder::new(Stage::Incoming);
        let first_step = match &outbox {
            Some(outbox) => first_step.register(OutboxStep::new(outbox.clone())),
            None => first_step.register(BatchedDispatchStep::new(transport.clone())),
        };
        let handlers = Arc::new(self.handlers);
        let incoming = self
            .incoming
            .into_iter()
            .fold(first_step, |builder, customize| customize(builder))
            .build(Arc::new(InvokeHandlers::new(handlers.clone(), session.clone())))?;

        let mut recoverability = match self.recoverability {
            Some(recoverability) => recoverability,
            None => RecoverabilityConfig::from_settings(&self.config.recoverability)?,
        };
        if recoverability.processing_timeout.is_none() {
            recoverability.processing_timeout = Some(self.config.processing_timeout());
        }
        if let Some(policy) = self.delay_policy {
            recoverability = recoverability.with_delay_policy(policy);
        }
        let classifier = self.classifier.unwrap_or_else(|| {
            Arc::new(DefaultClassifier::new(
                self.config.recoverability.unrecoverable_kinds.clone(),
            )) as Arc<dyn FailureClassifier>
        });
        let recoverability = RecoverabilityManager::new(recoverability, classifier, local_address.clone());

        if self.config.endpoint.auto_subscribe {
            for message_type in handlers.message_types().iter().filter(|t| t.is_event()) {
                subscriptions
                    .subscribe(message_type, local_address.clone())
                    .await?;
            }
        }

        info!(
            endpoint = %local_address,
            concurrency = self.config.endpoint.concurrency,
            outbox = outbox.is_some(),
            incoming = ?incoming.step_names(),
            outgoing = ?session.outgoing_pipeline().step_names(),
            "endpoint starting"
        );
        Ok(Endpoint::spawn(EndpointParts {
            config: self.config,
            transport,
            session,
            subscriptions,
            incoming,
            recoverability,
            outbox,
            processing_token,
        }))
    }
}

impl std::fmt::Debug for EndpointBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointBuilder")
            .field("config", &self.config)
            .field("handlers", &self.handlers)
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}
