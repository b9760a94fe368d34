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

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use derive_new::new;
use tracing::{debug, error, info, instrument, warn};

use crate::common::{ConfigError, ProcessingFailure, RecoverabilitySettings};
use crate::message::headers;
use crate::message::{Address, MessageEnvelope};
use crate::recoverability::{
    DelayPolicy, DelayedRetryCount, FailureClass, FailureClassifier, ImmediateRetryCounter,
};

/// Retry limits and the error destination.
#[derive(Debug, Clone)]
pub struct RecoverabilityConfig {
    /// In-process re-attempts per message.
    pub immediate_retries: u32,
    /// Transport-level requeues per message.
    pub delayed_retries: u32,
    /// Delay before each requeued attempt.
    pub delay_policy: DelayPolicy,
    /// Where exhausted and unrecoverable messages go.
    pub error_queue: Address,
    /// Upper bound for a single attempt. Elapsing counts as a transient failure.
    ///
    /// An endpoint fills an unset bound from `timeouts.processing_timeout_ms`.
    pub processing_timeout: Option<Duration>,
}

impl Default for RecoverabilityConfig {
    fn default() -> Self {
        Self {
            immediate_retries: 5,
            delayed_retries: 3,
            delay_policy: DelayPolicy::default(),
            error_queue: Address::new("error"),
            processing_timeout: None,
        }
    }
}

impl RecoverabilityConfig {
    /// Builds the runtime configuration from its serialized settings.
    pub fn from_settings(settings: &RecoverabilitySettings) -> Result<Self, ConfigError> {
        let error_queue =
            Address::parse(&settings.error_queue).map_err(|source| ConfigError::InvalidAddress {
                key: "recoverability.error_queue".to_string(),
                value: settings.error_queue.clone(),
                source,
            })?;
        Ok(Self {
            immediate_retries: settings.immediate_retries,
            delayed_retries: settings.delayed_retries,
            delay_policy: settings.delay.to_policy(),
            error_queue,
            ..Self::default()
        })
    }

    /// Sets the number of immediate retries.
    #[must_use]
    pub const fn with_immediate_retries(mut self, immediate_retries: u32) -> Self {
        self.immediate_retries = immediate_retries;
        self
    }

    /// Sets the number of delayed retries.
    #[must_use]
    pub const fn with_delayed_retries(mut self, delayed_retries: u32) -> Self {
        self.delayed_retries = delayed_retries;
        self
    }

    /// Sets how long each delayed retry waits.
    #[must_use]
    pub fn with_delay_policy(mut self, delay_policy: DelayPolicy) -> Self {
        self.delay_policy = delay_policy;
        self
    }

    /// Sets where exhausted messages go.
    #[must_use]
    pub fn with_error_queue(mut self, error_queue: Address) -> Self {
        self.error_queue = error_queue;
        self
    }

    /// Bounds each processing attempt. An endpoint replaces `None` with its
    /// configured timeout.
    #[must_use]
    pub const fn with_processing_timeout(mut self, processing_timeout: Option<Duration>) -> Self {
        self.processing_timeout = processing_timeout;
        self
    }
}

/// A failed attempt and the retries already spent on its message.
#[derive(new, Debug, Clone, Copy)]
pub struct FailureContext<'a> {
    /// The message as it was delivered.
    pub envelope: &'a MessageEnvelope,
    /// What went wrong.
    pub failure: &'a ProcessingFailure,
    /// Immediate retries performed so far.
    pub immediate_retries: u32,
    /// Delayed retries performed so far.
    pub delayed_retries: u32,
}

impl FailureContext<'_> {
    /// Processing attempts so far, including this one.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        1 + self.immediate_retries + self.delayed_retries
    }
}

/// What to do with a failed message.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoverabilityAction {
    /// Re-run the pipeline now, on the same worker.
    ImmediateRetry,
    /// Requeue `envelope` through the transport after `delay`.
    DelayedRetry {
        /// Wait before redelivery.
        delay: Duration,
        /// The message, stamped with its new delayed-retry count.
        envelope: MessageEnvelope,
    },
    /// Send `envelope` to `destination` and stop processing the message.
    MoveToError {
        /// The error queue.
        destination: Address,
        /// The original message plus failure metadata.
        envelope: MessageEnvelope,
    },
    /// Hand the message back unchanged for redelivery without counting the attempt.
    Defer {
        /// The original message.
        envelope: MessageEnvelope,
    },
}

/// How one delivery of a message ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// A handler run succeeded.
    Completed {
        /// Processing attempts spent, across deliveries.
        attempts: u32,
    },
    /// The transport should redeliver `envelope` after `delay`.
    DelayedRetry {
        /// Wait before redelivery.
        delay: Duration,
        /// The message to redeliver.
        envelope: MessageEnvelope,
    },
    /// The message belongs in the error queue.
    MovedToError {
        /// The error queue.
        destination: Address,
        /// The message with failure metadata.
        envelope: MessageEnvelope,
    },
    /// Processing was interrupted; redeliver `envelope` without delay.
    Deferred {
        /// The untouched message.
        envelope: MessageEnvelope,
    },
}

/// Runs the retry state machine for each delivered message.
///
/// A failed attempt is retried in place up to `immediate_retries` times, then
/// handed back to the transport for up to `delayed_retries` delayed
/// redeliveries, and finally moved to the error queue. The immediate count is
/// kept in memory per message identifier and is not reset by a delayed retry;
/// the delayed count travels in the message headers.
pub struct RecoverabilityManager {
    config: RecoverabilityConfig,
    classifier: Arc<dyn FailureClassifier>,
    immediate: ImmediateRetryCounter,
    processing_endpoint: Address,
}

impl RecoverabilityManager {
    /// Creates a manager for the endpoint whose input queue is `processing_endpoint`.
    pub fn new(
        config: RecoverabilityConfig,
        classifier: Arc<dyn FailureClassifier>,
        processing_endpoint: Address,
    ) -> Self {
        Self {
            config,
            classifier,
            immediate: ImmediateRetryCounter::new(),
            processing_endpoint,
        }
    }

    /// The limits this manager applies.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &RecoverabilityConfig {
        &self.config
    }

    /// The in-memory immediate retry counter.
    #[inline]
    #[must_use]
    pub const fn immediate_retries(&self) -> &ImmediateRetryCounter {
        &self.immediate
    }

    /// Decides what happens after the failed attempt described by `failure`.
    #[must_use]
    pub fn decide(&self, failure: &FailureContext<'_>) -> RecoverabilityAction {
        match self.classifier.classify(failure.failure) {
            FailureClass::Deferred => RecoverabilityAction::Defer {
                envelope: failure.envelope.clone(),
            },
            FailureClass::Unrecoverable => self.move_to_error(failure),
            FailureClass::Retryable if failure.immediate_retries < self.config.immediate_retries => {
                RecoverabilityAction::ImmediateRetry
            }
            FailureClass::Retryable if failure.delayed_retries < self.config.delayed_retries => {
                let next = DelayedRetryCount::of(failure.envelope).next();
                RecoverabilityAction::DelayedRetry {
                    delay: self.config.delay_policy.delay_for(next.get()),
                    envelope: next.apply_to(failure.envelope),
                }
            }
            FailureClass::Retryable => self.move_to_error(failure),
        }
    }

    /// Drives one delivery of `envelope` to its disposition.
    ///
    /// `attempt` runs the incoming pipeline once; it is called again for each
    /// immediate retry. Each call is bounded by the configured processing
    /// timeout.
    #[instrument(skip_all, fields(message_id = %envelope.id(), message_type = %envelope.message_type()))]
    pub async fn process<F, Fut>(&self, envelope: MessageEnvelope, mut attempt: F) -> Disposition
    where
        F: FnMut(MessageEnvelope) -> Fut + Send,
        Fut: Future<Output = Result<(), ProcessingFailure>> + Send,
    {
        let id = envelope.id().clone();
        let delayed_retries = DelayedRetryCount::of(&envelope).get();
        // A delayed redelivery only happens once immediate retries ran out.
        let spent = if delayed_retries > 0 {
            self.config.immediate_retries
        } else {
            0
        };
        loop {
            let result = match self.config.processing_timeout {
                Some(limit) => tokio::time::timeout(limit, attempt(envelope.clone()))
                    .await
                    .unwrap_or(Err(ProcessingFailure::Timeout(limit))),
                None => attempt(envelope.clone()).await,
            };
            let immediate_retries = self.immediate.get(&id).max(spent);
            let failure = match result {
                Ok(()) => {
                    self.immediate.clear(&id);
                    let attempts = 1 + immediate_retries + delayed_retries;
                    debug!(attempts, "message processed");
                    return Disposition::Completed { attempts };
                }
                Err(failure) => failure,
            };

            let context = FailureContext::new(&envelope, &failure, immediate_retries, delayed_retries);
            match self.decide(&context) {
                RecoverabilityAction::ImmediateRetry => {
                    let retry = self.immediate.increment(&id);
                    warn!(attempt = context.attempts(), retry, error = %failure, "immediate retry");
                }
                RecoverabilityAction::DelayedRetry { delay, envelope } => {
                    self.immediate.clear(&id);
                    warn!(attempt = context.attempts(), ?delay, error = %failure, "delayed retry");
                    return Disposition::DelayedRetry { delay, envelope };
                }
                RecoverabilityAction::MoveToError {
                    destination,
                    envelope,
                } => {
                    self.immediate.clear(&id);
                    error!(
                        attempts = context.attempts(),
                        destination = %destination,
                        kind = %failure.kind(),
                        error = %failure,
                        "moving message to error queue"
                    );
                    return Disposition::MovedToError {
                        destination,
                        envelope,
                    };
                }
                RecoverabilityAction::Defer { envelope } => {
                    self.immediate.clear(&id);
                    info!("processing interrupted, deferring message");
                    return Disposition::Deferred { envelope };
                }
            }
        }
    }

    fn move_to_error(&self, failure: &FailureContext<'_>) -> RecoverabilityAction {
        let envelope = failure.envelope.with_headers([
            (headers::EXCEPTION_KIND, failure.failure.kind().to_string()),
            (headers::EXCEPTION_MESSAGE, failure.failure.to_string()),
            (headers::PROCESSING_ATTEMPTS, failure.attempts().to_string()),
            (headers::IMMEDIATE_RETRIES, failure.immediate_retries.to_string()),
            (headers::DELAYED_RETRIES, failure.delayed_retries.to_string()),
            (headers::TIME_OF_FAILURE, Utc::now().to_rfc3339()),
            (headers::FAILED_QUEUE, self.processing_endpoint.to_string()),
            (headers::PROCESSING_ENDPOINT, self.processing_endpoint.queue().to_string()),
        ]);
        RecoverabilityAction::MoveToError {
            destination: self.config.error_queue.clone(),
            envelope,
        }
    }
}

impl std::fmt::Debug for RecoverabilityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoverabilityManager")
            .field("config", &self.config)
            .field("processing_endpoint", &self.processing_endpoint)
            .field("tracked", &self.immediate.tracked())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::message::MessageType;
    use crate::recoverability::DefaultClassifier;

    fn manager(immediate: u32, delayed: u32) -> RecoverabilityManager {
        let config = RecoverabilityConfig::default()
            .with_immediate_retries(immediate)
            .with_delayed_retries(delayed)
            .with_delay_policy(DelayPolicy::Fixed(Duration::from_secs(1)));
        RecoverabilityManager::new(
            config,
            Arc::new(DefaultClassifier::default()),
            Address::new("orders").at("host-a"),
        )
    }

    fn envelope() -> MessageEnvelope {
        MessageEnvelope::builder(MessageType::new("PlaceOrder"), b"{}".to_vec())
            .id("order-1")
            .build()
    }

    #[tokio::test]
    async fn exhausting_every_retry_takes_six_attempts() {
        let manager = manager(3, 2);
        let calls = Arc::new(AtomicU32::new(0));
        let mut delivery = envelope();

        let (destination, failed) = loop {
            let counter = calls.clone();
            let disposition = manager
                .process(delivery.clone(), move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err(ProcessingFailure::handler(anyhow::anyhow!("boom"))) }
                })
                .await;
            match disposition {
                Disposition::DelayedRetry { envelope, .. } => delivery = envelope,
                Disposition::MovedToError {
                    destination,
                    envelope,
                } => break (destination, envelope),
                other => panic!("unexpected disposition {other:?}"),
            }
        };

        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(destination, Address::new("error"));
        assert_eq!(failed.header(headers::PROCESSING_ATTEMPTS), Some("6"));
        assert_eq!(failed.header(headers::IMMEDIATE_RETRIES), Some("3"));
        assert_eq!(failed.header(headers::DELAYED_RETRIES), Some("2"));
        assert_eq!(failed.header(headers::EXCEPTION_KIND), Some("handler"));
        assert_eq!(failed.header(headers::FAILED_QUEUE), Some("orders@host-a"));
        assert_eq!(failed.header(headers::MESSAGE_ID), Some("order-1"));
        assert!(failed.headers().contains(headers::TIME_OF_FAILURE));
        assert_eq!(manager.immediate_retries().tracked(), 0);
    }

    #[tokio::test]
    async fn delayed_retries_release_the_immediate_counter() {
        let manager = manager(2, 1);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let disposition = manager
            .process(envelope(), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(ProcessingFailure::transient("busy")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(disposition, Disposition::DelayedRetry { .. }));
        assert_eq!(manager.immediate_retries().tracked(), 0);

        let Disposition::DelayedRetry { envelope, .. } = disposition else {
            unreachable!()
        };
        let counter = calls.clone();
        let disposition = manager
            .process(envelope, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(ProcessingFailure::transient("busy")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(matches!(
            disposition,
            Disposition::MovedToError { envelope, .. }
                if envelope.header(headers::IMMEDIATE_RETRIES) == Some("2")
                    && envelope.header(headers::PROCESSING_ATTEMPTS) == Some("4")
        ));
        assert_eq!(manager.immediate_retries().tracked(), 0);
    }

    #[tokio::test]
    async fn fatal_failures_skip_retries() {
        let manager = manager(3, 2);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let disposition = manager
            .process(envelope(), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(ProcessingFailure::fatal("corrupt body")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            disposition,
            Disposition::MovedToError { envelope, .. } if envelope.header(headers::PROCESSING_ATTEMPTS) == Some("1")
        ));
    }

    #[tokio::test]
    async fn success_after_retries_clears_the_counter() {
        let manager = manager(3, 2);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let disposition = manager
            .process(envelope(), move |_| {
                let call = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call < 2 {
                        Err(ProcessingFailure::transient("busy"))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert_eq!(disposition, Disposition::Completed { attempts: 3 });
        assert_eq!(manager.immediate_retries().tracked(), 0);
    }

    #[tokio::test]
    async fn cancelled_attempts_are_deferred_without_counting() {
        let manager = manager(3, 2);
        let disposition = manager
            .process(envelope(), |_| async { Err(ProcessingFailure::Cancelled) })
            .await;

        assert!(matches!(disposition, Disposition::Deferred { envelope } if envelope.header(headers::DELAYED_RETRIES).is_none()));
        assert_eq!(manager.immediate_retries().get(&"order-1".into()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_time_out_as_transient_failures() {
        let config = RecoverabilityConfig::default()
            .with_immediate_retries(0)
            .with_delayed_retries(1)
            .with_processing_timeout(Some(Duration::from_millis(50)));
        let manager = RecoverabilityManager::new(
            config,
            Arc::new(DefaultClassifier::default()),
            Address::new("orders"),
        );

        let disposition = manager
            .process(envelope(), |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(
            disposition,
            Disposition::DelayedRetry { delay, .. } if delay == Duration::from_secs(10)
        ));
    }

    #[test]
    fn delayed_retry_delays_follow_the_policy() {
        let manager = manager(0, 3);
        let failure = ProcessingFailure::transient("busy");
        let second_round = DelayedRetryCount::of(&envelope()).next().apply_to(&envelope());

        let action = manager.decide(&FailureContext::new(&second_round, &failure, 0, 1));
        assert!(matches!(
            action,
            RecoverabilityAction::DelayedRetry { delay, envelope }
                if delay == Duration::from_secs(1) && DelayedRetryCount::of(&envelope).get() == 2
        ));
    }
}
