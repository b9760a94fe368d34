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

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::common::{CourierConfig, CourierError};
use crate::endpoint::{BusSession, PublishOptions, SendOptions};
use crate::message::{message_type_of, Address, Message, MessageEnvelope, MessageIntent};
use crate::outbox::Outbox;
use crate::pipeline::{Extensions, Pipeline, ProcessingContext};
use crate::recoverability::{Disposition, RecoverabilityManager};
use crate::subscriptions::SubscriptionRegistry;
use crate::transport::Transport;

pub(crate) struct EndpointParts {
    pub(crate) config: CourierConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) session: BusSession,
    pub(crate) subscriptions: SubscriptionRegistry,
    pub(crate) incoming: Pipeline,
    pub(crate) recoverability: RecoverabilityManager,
    pub(crate) outbox: Option<Outbox>,
    pub(crate) processing_token: CancellationToken,
}

struct EndpointInner {
    config: CourierConfig,
    transport: Arc<dyn Transport>,
    session: BusSession,
    subscriptions: SubscriptionRegistry,
    incoming: Pipeline,
    recoverability: RecoverabilityManager,
    outbox: Option<Outbox>,
    receive_token: CancellationToken,
    processing_token: CancellationToken,
    tracker: TaskTracker,
}

/// A running endpoint.
///
/// Received messages are processed concurrently, up to the configured
/// concurrency, each through the incoming pipeline and the recoverability
/// state machine. Clones share the same endpoint.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<EndpointInner>,
}

impl Endpoint {
    pub(crate) fn spawn(parts: EndpointParts) -> Self {
        let inner = Arc::new(EndpointInner {
            config: parts.config,
            transport: parts.transport,
            session: parts.session,
            subscriptions: parts.subscriptions,
            incoming: parts.incoming,
            recoverability: parts.recoverability,
            outbox: parts.outbox,
            receive_token: CancellationToken::new(),
            processing_token: parts.processing_token,
            tracker: TaskTracker::new(),
        });

        let concurrency = inner
            .config
            .endpoint
            .concurrency
            .clamp(1, Semaphore::MAX_PERMITS);
        inner
            .tracker
            .spawn(receive_loop(inner.clone(), Arc::new(Semaphore::new(concurrency))));
        if inner.outbox.is_some() {
            inner.tracker.spawn(outbox_sweep(inner.clone()));
        }
        Self { inner }
    }

    /// The endpoint's input queue.
    #[must_use]
    pub fn local_address(&self) -> &Address {
        self.inner.transport.local_address()
    }

    /// The subscription registry publishes are routed through.
    #[must_use]
    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.inner.subscriptions
    }

    /// The configuration the endpoint was started with.
    #[must_use]
    pub fn config(&self) -> &CourierConfig {
        &self.inner.config
    }

    /// Names of the incoming pipeline's steps, in execution order.
    #[must_use]
    pub fn incoming_steps(&self) -> Vec<&str> {
        self.inner.incoming.step_names()
    }

    /// Names of the outgoing pipeline's steps, in execution order.
    #[must_use]
    pub fn outgoing_steps(&self) -> Vec<&str> {
        self.inner.session.outgoing_pipeline().step_names()
    }

    /// Sends `message` to its conventional destination.
    ///
    /// Fails with [`RoutingError::NoDestinationSpecified`](crate::common::RoutingError::NoDestinationSpecified)
    /// when no route matches; nothing is dispatched in that case.
    pub async fn send<M: Message>(&self, message: &M) -> Result<(), CourierError> {
        self.send_with(message, SendOptions::default()).await
    }

    /// Sends `message` to `destination`.
    pub async fn send_to<M: Message>(&self, destination: Address, message: &M) -> Result<(), CourierError> {
        self.send_with(message, SendOptions::default().with_destination(destination))
            .await
    }

    /// Sends `message` with explicit options.
    #[instrument(skip_all, fields(message_type = %message_type_of::<M>()))]
    pub async fn send_with<M: Message>(&self, message: &M, options: SendOptions) -> Result<(), CourierError> {
        let envelope = options
            .apply(self.inner.session.envelope_for(message, MessageIntent::Send)?)
            .build();
        self.dispatch(envelope, options.destination).await
    }

    /// Publishes `message` to every current subscriber of its type.
    pub async fn publish<M: Message>(&self, message: &M) -> Result<(), CourierError> {
        self.publish_with(message, PublishOptions::default()).await
    }

    /// Publishes `message` with explicit options.
    #[instrument(skip_all, fields(message_type = %message_type_of::<M>()))]
    pub async fn publish_with<M: Message>(&self, message: &M, options: PublishOptions) -> Result<(), CourierError> {
        let envelope = options
            .apply(self.inner.session.envelope_for(message, MessageIntent::Publish)?)
            .build();
        self.dispatch(envelope, None).await
    }

    /// Subscribes this endpoint to publishes of `M` and its subtypes.
    pub async fn subscribe<M: Message>(&self) -> Result<(), CourierError> {
        self.inner
            .subscriptions
            .subscribe(&message_type_of::<M>(), self.local_address().clone())
            .await?;
        Ok(())
    }

    /// Removes this endpoint's subscription to `M`.
    pub async fn unsubscribe<M: Message>(&self) -> Result<(), CourierError> {
        self.inner
            .subscriptions
            .unsubscribe(&message_type_of::<M>(), self.local_address())
            .await?;
        Ok(())
    }

    /// Stops receiving and waits for in-flight messages.
    ///
    /// Messages still running when the shutdown timeout elapses are cancelled
    /// at their next step boundary and handed back to the transport, and
    /// [`CourierError::ShutdownTimeout`] is returned.
    #[instrument(skip(self), fields(endpoint = %self.local_address()))]
    pub async fn shutdown(&self) -> Result<(), CourierError> {
        let timeout = self.inner.config.shutdown_timeout();
        self.inner.receive_token.cancel();
        self.inner.tracker.close();

        trace!("Waiting for in-flight messages to finish...");
        if tokio::time::timeout(timeout, self.inner.tracker.wait())
            .await
            .is_ok()
        {
            info!("endpoint stopped");
            return Ok(());
        }

        error!(?timeout, "Shutdown timeout expired. Cancelling in-flight messages.");
        self.inner.processing_token.cancel();
        if tokio::time::timeout(timeout, self.inner.tracker.wait())
            .await
            .is_err()
        {
            error!("in-flight messages did not observe cancellation");
        }
        Err(CourierError::ShutdownTimeout(timeout))
    }

    async fn dispatch(&self, envelope: MessageEnvelope, destination: Option<Address>) -> Result<(), CourierError> {
        let mut extensions = Extensions::new();
        self.inner
            .session
            .dispatch(envelope, destination, &mut extensions)
            .await
            .map_err(CourierError::from)
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("local_address", self.local_address())
            .field("incoming", &self.inner.incoming)
            .field("outbox", &self.inner.outbox.is_some())
            .finish_non_exhaustive()
    }
}

#[instrument(skip_all, fields(endpoint = %inner.transport.local_address()))]
async fn receive_loop(inner: Arc<EndpointInner>, permits: Arc<Semaphore>) {
    let receive_timeout = inner.config.receive_timeout();
    debug!("receive loop started");
    loop {
        let permit = tokio::select! {
            () = inner.receive_token.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let received = tokio::select! {
            () = inner.receive_token.cancelled() => break,
            received = inner.transport.receive(receive_timeout) => received,
        };
        match received {
            Ok(Some(envelope)) => {
                let worker = inner.clone();
                inner.tracker.spawn(async move {
                    process_message(&worker, envelope).await;
                    drop(permit);
                });
            }
            Ok(None) => {}
            Err(error) => {
                warn!(%error, "receive failed");
                tokio::select! {
                    () = inner.receive_token.cancelled() => break,
                    () = tokio::time::sleep(receive_timeout) => {}
                }
            }
        }
    }
    debug!("receive loop stopped");
}

async fn process_message(inner: &EndpointInner, envelope: MessageEnvelope) {
    let disposition = inner
        .recoverability
        .process(envelope, |envelope| {
            let pipeline = inner.incoming.clone();
            let token = inner.processing_token.clone();
            async move {
                let mut ctx = ProcessingContext::incoming(envelope, token);
                pipeline.invoke(&mut ctx).await
            }
        })
        .await;
    apply_disposition(inner.transport.as_ref(), disposition).await;
}

async fn apply_disposition(transport: &dyn Transport, disposition: Disposition) {
    match disposition {
        Disposition::Completed { .. } => {}
        Disposition::DelayedRetry { delay, envelope } => {
            if let Err(error) = transport.request_delayed_redelivery(envelope.clone(), delay).await {
                error!(message_id = %envelope.id(), %error, "delayed retry could not be scheduled, requeueing");
                requeue(transport, envelope).await;
            }
        }
        Disposition::MovedToError {
            destination,
            envelope,
        } => {
            if let Err(error) = transport.dispatch(&destination, envelope.clone()).await {
                error!(message_id = %envelope.id(), %error, "error queue unavailable, requeueing");
                requeue(transport, envelope).await;
            }
        }
        Disposition::Deferred { envelope } => requeue(transport, envelope).await,
    }
}

async fn requeue(transport: &dyn Transport, envelope: MessageEnvelope) {
    let message_id = envelope.id().clone();
    if let Err(error) = transport
        .request_delayed_redelivery(envelope, Duration::ZERO)
        .await
    {
        error!(message_id = %message_id, %error, "message could not be handed back to the transport");
    }
}

#[instrument(skip_all, fields(endpoint = %inner.transport.local_address()))]
async fn outbox_sweep(inner: Arc<EndpointInner>) {
    let Some(outbox) = inner.outbox.clone() else {
        return;
    };
    let interval = inner.config.outbox_sweep_interval();
    loop {
        if let Err(error) = outbox.recover().await {
            warn!(%error, "outbox recovery sweep failed");
        }
        tokio::select! {
            () = inner.receive_token.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
    }
}
