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

use courier::prelude::*;
use tokio::sync::mpsc;

use super::messages::{OrderPlaced, Ping, PlaceOrder, Pong};

/// Forwards every message it handles to a channel the test reads from.
pub struct Forward<M> {
    tx: mpsc::UnboundedSender<M>,
}

impl<M> Forward<M> {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<M>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl<M: Message> MessageHandler<M> for Forward<M> {
    async fn handle(&self, message: M, _ctx: &mut HandlerContext) -> anyhow::Result<()> {
        self.tx
            .send(message)
            .map_err(|_| anyhow::anyhow!("test receiver dropped"))
    }
}

/// Counts attempts and always fails with a transient error.
#[derive(Clone, Default)]
pub struct AlwaysFails {
    pub attempts: Arc<AtomicU32>,
}

impl AlwaysFails {
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<M: Message> MessageHandler<M> for AlwaysFails {
    async fn handle(&self, _message: M, _ctx: &mut HandlerContext) -> anyhow::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(ProcessingFailure::transient("database unavailable").into())
    }
}

/// Counts attempts and fails with an unrecoverable error.
#[derive(Clone, Default)]
pub struct Corrupt {
    pub attempts: Arc<AtomicU32>,
}

#[async_trait]
impl<M: Message> MessageHandler<M> for Corrupt {
    async fn handle(&self, _message: M, _ctx: &mut HandlerContext) -> anyhow::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(ProcessingFailure::fatal("payload rejected").into())
    }
}

/// Answers every ping with a pong carrying the same sequence number.
pub struct PingReplier;

#[async_trait]
impl MessageHandler<Ping> for PingReplier {
    async fn handle(&self, message: Ping, ctx: &mut HandlerContext) -> anyhow::Result<()> {
        ctx.reply(&Pong {
            sequence: message.sequence,
        })
        .await?;
        Ok(())
    }
}

/// Publishes `OrderPlaced` for every order, then optionally fails.
///
/// With `fail_after_publish` set, the publish must never leave the endpoint:
/// outgoing messages are only dispatched once handling succeeds.
#[derive(Clone, Default)]
pub struct AcceptOrder {
    pub attempts: Arc<AtomicU32>,
    pub fail_after_publish: bool,
}

#[async_trait]
impl MessageHandler<PlaceOrder> for AcceptOrder {
    async fn handle(&self, message: PlaceOrder, ctx: &mut HandlerContext) -> anyhow::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        ctx.publish(&OrderPlaced {
            order_id: message.order_id,
            total_cents: 4_200,
        })
        .await?;
        if self.fail_after_publish {
            return Err(ProcessingFailure::fatal("order rejected after publishing").into());
        }
        Ok(())
    }
}
