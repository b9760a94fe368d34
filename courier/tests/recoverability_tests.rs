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

use courier::message::headers;
use courier::prelude::*;
use courier::recoverability::{DefaultClassifier, RecoverabilityConfig};
use courier_test::prelude::*;

use crate::setup::*;

mod setup;

fn fast_retries(immediate: u32, delayed: u32) -> RecoverabilityConfig {
    RecoverabilityConfig::default()
        .with_immediate_retries(immediate)
        .with_delayed_retries(delayed)
        .with_delay_policy(DelayPolicy::Fixed(Duration::from_millis(20)))
        .with_error_queue(Address::new("error"))
}

#[courier_test]
async fn exhausted_retries_move_the_message_to_the_error_queue() -> anyhow::Result<()> {
    initialize_tracing();
    let network = InMemoryNetwork::new();
    let handler = AlwaysFails::default();
    let orders = EndpointBuilder::default()
        .transport(network.transport(Address::new("orders")))
        .handle::<PlaceOrder, _>(handler.clone())
        .recoverability(fast_retries(3, 2))
        .start()
        .await?;

    orders
        .send_to(Address::new("orders"), &PlaceOrder { order_id: 42 })
        .await?;

    let failed = network
        .take(&Address::new("error"), WAIT)
        .await
        .ok_or_else(|| anyhow::anyhow!("message never reached the error queue"))?;
    assert_eq!(handler.attempts(), 6);
    assert_eq!(failed.header(headers::PROCESSING_ATTEMPTS), Some("6"));
    assert_eq!(failed.header(headers::IMMEDIATE_RETRIES), Some("3"));
    assert_eq!(failed.header(headers::DELAYED_RETRIES), Some("2"));
    assert_eq!(failed.header(headers::EXCEPTION_KIND), Some("transient"));
    assert_eq!(
        failed.header(headers::FAILED_QUEUE),
        Some(orders.local_address().to_string().as_str())
    );
    assert!(failed.header(headers::TIME_OF_FAILURE).is_some());
    assert_eq!(failed.decode::<PlaceOrder>()?.order_id, 42);

    orders.shutdown().await?;
    Ok(())
}

#[courier_test]
async fn unrecoverable_failures_skip_every_retry() -> anyhow::Result<()> {
    initialize_tracing();
    let network = InMemoryNetwork::new();
    let handler = Corrupt::default();
    let orders = EndpointBuilder::default()
        .transport(network.transport(Address::new("orders")))
        .handle::<PlaceOrder, _>(handler.clone())
        .recoverability(fast_retries(3, 2))
        .start()
        .await?;

    orders
        .send_to(Address::new("orders"), &PlaceOrder { order_id: 1 })
        .await?;

    let failed = network
        .take(&Address::new("error"), WAIT)
        .await
        .ok_or_else(|| anyhow::anyhow!("message never reached the error queue"))?;
    assert_eq!(handler.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(failed.header(headers::PROCESSING_ATTEMPTS), Some("1"));
    assert_eq!(failed.header(headers::EXCEPTION_KIND), Some("fatal"));

    orders.shutdown().await?;
    Ok(())
}

#[courier_test]
async fn messages_without_a_handler_are_unrecoverable() -> anyhow::Result<()> {
    initialize_tracing();
    let network = InMemoryNetwork::new();
    let orders = EndpointBuilder::default()
        .transport(network.transport(Address::new("orders")))
        .recoverability(fast_retries(3, 2))
        .start()
        .await?;

    orders
        .send_to(Address::new("orders"), &ShipOrder { order_id: 1 })
        .await?;

    let failed = network
        .take(&Address::new("error"), WAIT)
        .await
        .ok_or_else(|| anyhow::anyhow!("message never reached the error queue"))?;
    assert_eq!(failed.header(headers::PROCESSING_ATTEMPTS), Some("1"));

    orders.shutdown().await?;
    Ok(())
}

#[courier_test]
async fn a_custom_classifier_can_mark_handler_errors_unrecoverable() -> anyhow::Result<()> {
    initialize_tracing();
    let network = InMemoryNetwork::new();
    let handler = AlwaysFails::default();
    let classifier = DefaultClassifier::default()
        .unrecoverable_when(|failure| failure.to_string().contains("database"));
    let orders = EndpointBuilder::default()
        .transport(network.transport(Address::new("orders")))
        .handle::<PlaceOrder, _>(handler.clone())
        .recoverability(fast_retries(3, 2))
        .classifier(classifier)
        .start()
        .await?;

    orders
        .send_to(Address::new("orders"), &PlaceOrder { order_id: 2 })
        .await?;

    network
        .take(&Address::new("error"), WAIT)
        .await
        .ok_or_else(|| anyhow::anyhow!("message never reached the error queue"))?;
    assert_eq!(handler.attempts(), 1);

    orders.shutdown().await?;
    Ok(())
}

#[courier_test]
async fn a_message_that_eventually_succeeds_is_not_moved() -> anyhow::Result<()> {
    initialize_tracing();
    let network = InMemoryNetwork::new();
    let attempts = Arc::new(AtomicU32::new(0));
    let (forward, mut succeeded) = Forward::<PlaceOrder>::channel();
    let orders = EndpointBuilder::default()
        .transport(network.transport(Address::new("orders")))
        .handle::<PlaceOrder, _>(FailTimes {
            attempts: attempts.clone(),
            failures: 2,
        })
        .handle::<PlaceOrder, _>(forward)
        .recoverability(fast_retries(3, 0))
        .start()
        .await?;

    orders
        .send_to(Address::new("orders"), &PlaceOrder { order_id: 8 })
        .await?;

    let handled = tokio::time::timeout(WAIT, succeeded.recv()).await?;
    assert_eq!(handled.map(|m| m.order_id), Some(8));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(network.try_take(&Address::new("error")).is_none());

    orders.shutdown().await?;
    Ok(())
}

#[courier_test]
async fn the_configured_processing_timeout_applies_with_custom_retries() -> anyhow::Result<()> {
    initialize_tracing();
    let network = InMemoryNetwork::new();
    let mut config = CourierConfig::default();
    config.timeouts.processing_timeout_ms = 50;
    config.timeouts.shutdown_timeout_ms = 100;
    let orders = EndpointBuilder::with_config(config)
        .transport(network.transport(Address::new("orders")))
        .handle::<PlaceOrder, _>(Stalls)
        .recoverability(fast_retries(1, 0))
        .start()
        .await?;

    orders
        .send_to(Address::new("orders"), &PlaceOrder { order_id: 9 })
        .await?;

    let failed = network
        .take(&Address::new("error"), WAIT)
        .await
        .ok_or_else(|| anyhow::anyhow!("slow message never timed out"))?;
    assert_eq!(failed.header(headers::PROCESSING_ATTEMPTS), Some("2"));
    assert_eq!(failed.header(headers::EXCEPTION_KIND), Some("transient"));

    orders.shutdown().await?;
    Ok(())
}

/// Never finishes within any reasonable processing timeout.
struct Stalls;

#[async_trait]
impl MessageHandler<PlaceOrder> for Stalls {
    async fn handle(&self, _message: PlaceOrder, _ctx: &mut HandlerContext) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    }
}

/// Fails the first `failures` attempts, then succeeds.
struct FailTimes {
    attempts: Arc<AtomicU32>,
    failures: u32,
}

#[async_trait]
impl MessageHandler<PlaceOrder> for FailTimes {
    async fn handle(&self, _message: PlaceOrder, _ctx: &mut HandlerContext) -> anyhow::Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            anyhow::bail!("attempt {attempt} failed");
        }
        Ok(())
    }
}
