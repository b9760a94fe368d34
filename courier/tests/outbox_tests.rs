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
use std::sync::atomic::Ordering;
use std::time::Duration;

use courier::outbox::{InMemoryOutboxStorage, OutboxRecord, OutboxStorage};
use courier::prelude::*;
use courier::routing::RoutedMessage;
use courier_test::prelude::*;

use crate::setup::*;

mod setup;

#[courier_test]
async fn a_committed_message_is_replayed_without_running_handlers() -> anyhow::Result<()> {
    initialize_tracing();
    let network = InMemoryNetwork::new();
    let storage = InMemoryOutboxStorage::new();

    let handler = AcceptOrder::default();
    let sales = EndpointBuilder::default()
        .transport(network.transport(Address::new("sales")))
        .outbox_storage(storage.clone())
        .handle::<PlaceOrder, _>(handler.clone())
        .start()
        .await?;
    // Let the startup recovery sweep pass before the record exists.
    tokio::time::sleep(Duration::from_millis(50)).await;

    // A previous run handled the order and committed, then crashed before
    // dispatching what the handler produced.
    let incoming_id = MessageId::new();
    let stored = MessageEnvelope::builder_for(&OrderPlaced {
        order_id: 77,
        total_cents: 1_250,
    })?
    .intent(MessageIntent::Publish)
    .correlation_id(incoming_id.clone())
    .build();
    let transaction = storage.begin(&incoming_id).await?;
    storage
        .commit(
            transaction,
            OutboxRecord::new(
                incoming_id.clone(),
                vec![RoutedMessage::new(Address::new("billing"), stored.clone())],
            ),
        )
        .await?;

    // The transport redelivers the original message.
    sales
        .send_with(
            &PlaceOrder { order_id: 77 },
            SendOptions::new()
                .with_destination(Address::new("sales"))
                .with_message_id(incoming_id.clone()),
        )
        .await?;

    let replayed = network
        .take(&Address::new("billing"), WAIT)
        .await
        .ok_or_else(|| anyhow::anyhow!("stored message was never dispatched"))?;
    assert_eq!(replayed, stored);

    sales.shutdown().await?;
    assert_eq!(handler.attempts.load(Ordering::SeqCst), 0);
    assert!(network.try_take(&Address::new("billing")).is_none());
    assert!(storage.undispatched().await?.is_empty());
    Ok(())
}

#[courier_test]
async fn startup_recovery_dispatches_records_left_undispatched() -> anyhow::Result<()> {
    initialize_tracing();
    let network = InMemoryNetwork::new();
    let storage = InMemoryOutboxStorage::new();

    // A previous run committed but never dispatched, and the transport will
    // not redeliver the incoming message.
    let incoming_id = MessageId::new();
    let stored = MessageEnvelope::builder_for(&ShipOrder { order_id: 31 })?
        .correlation_id(incoming_id.clone())
        .build();
    let transaction = storage.begin(&incoming_id).await?;
    storage
        .commit(
            transaction,
            OutboxRecord::new(
                incoming_id.clone(),
                vec![RoutedMessage::new(Address::new("shipping"), stored.clone())],
            ),
        )
        .await?;

    let sales = EndpointBuilder::default()
        .transport(network.transport(Address::new("sales")))
        .outbox_storage(storage.clone())
        .start()
        .await?;

    let recovered = network
        .take(&Address::new("shipping"), WAIT)
        .await
        .ok_or_else(|| anyhow::anyhow!("recovery never dispatched the stored message"))?;
    assert_eq!(recovered, stored);

    let marked = tokio::time::timeout(WAIT, async {
        loop {
            match storage.get(&incoming_id).await {
                Ok(Some(record)) if record.dispatched => break,
                _ => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
    })
    .await;
    assert!(marked.is_ok(), "record was never marked dispatched");
    assert!(storage.undispatched().await?.is_empty());

    sales.shutdown().await?;
    assert!(network.try_take(&Address::new("shipping")).is_none());
    Ok(())
}

#[courier_test]
async fn duplicate_deliveries_run_handlers_once() -> anyhow::Result<()> {
    initialize_tracing();
    let network = InMemoryNetwork::new();
    let storage = InMemoryOutboxStorage::new();
    let handler = AcceptOrder::default();
    let sales = EndpointBuilder::default()
        .transport(network.transport(Address::new("sales")))
        .outbox_storage(storage.clone())
        .handle::<PlaceOrder, _>(handler.clone())
        .concurrency(1)
        .start()
        .await?;
    sales
        .subscriptions()
        .subscribe(&message_type_of::<OrderPlaced>(), Address::new("billing"))
        .await?;

    let message_id = MessageId::new();
    for _ in 0..2 {
        sales
            .send_with(
                &PlaceOrder { order_id: 9 },
                SendOptions::new()
                    .with_destination(Address::new("sales"))
                    .with_message_id(message_id.clone()),
            )
            .await?;
    }

    let first = network
        .take(&Address::new("billing"), WAIT)
        .await
        .ok_or_else(|| anyhow::anyhow!("order was never published"))?;
    assert_eq!(first.decode::<OrderPlaced>()?.order_id, 9);

    // Give the duplicate time to be received and deduplicated.
    tokio::time::sleep(Duration::from_millis(200)).await;
    sales.shutdown().await?;

    assert_eq!(handler.attempts.load(Ordering::SeqCst), 1);
    assert!(network.try_take(&Address::new("billing")).is_none());
    let record = storage
        .get(&message_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no outbox record"))?;
    assert!(record.dispatched);
    assert_eq!(record.operations.len(), 1);
    Ok(())
}

#[courier_test]
async fn a_failed_handler_commits_nothing() -> anyhow::Result<()> {
    initialize_tracing();
    let network = InMemoryNetwork::new();
    let storage = InMemoryOutboxStorage::new();
    let handler = AcceptOrder {
        fail_after_publish: true,
        ..AcceptOrder::default()
    };
    let sales = EndpointBuilder::default()
        .transport(network.transport(Address::new("sales")))
        .outbox_storage(storage.clone())
        .handle::<PlaceOrder, _>(handler.clone())
        .start()
        .await?;
    sales
        .subscriptions()
        .subscribe(&message_type_of::<OrderPlaced>(), Address::new("billing"))
        .await?;

    let message_id = MessageId::new();
    sales
        .send_with(
            &PlaceOrder { order_id: 4 },
            SendOptions::new()
                .with_destination(Address::new("sales"))
                .with_message_id(message_id.clone()),
        )
        .await?;

    network
        .take(&Address::new("error"), WAIT)
        .await
        .ok_or_else(|| anyhow::anyhow!("message never reached the error queue"))?;
    sales.shutdown().await?;

    assert!(storage.get(&message_id).await?.is_none());
    assert!(network.try_take(&Address::new("billing")).is_none());
    Ok(())
}

#[courier_test]
async fn the_outbox_step_leads_the_incoming_pipeline() -> anyhow::Result<()> {
    initialize_tracing();
    let network = InMemoryNetwork::new();
    let sales = EndpointBuilder::default()
        .transport(network.transport(Address::new("sales")))
        .enable_outbox()
        .start()
        .await?;

    assert_eq!(sales.incoming_steps(), vec![courier::outbox::OUTBOX_STEP]);

    sales.shutdown().await?;
    Ok(())
}
