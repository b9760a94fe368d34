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

//! Retry counters.
//!
//! Immediate retries are counted in memory and forgotten on restart. Delayed
//! retries are counted in a header, so the count travels with the message
//! through the transport and survives restarts.

use chrono::Utc;
use dashmap::DashMap;

use crate::message::headers;
use crate::message::{MessageEnvelope, MessageId};

/// Immediate retries performed so far, per message identifier.
#[derive(Debug, Default)]
pub struct ImmediateRetryCounter {
    counts: DashMap<MessageId, u32>,
}

impl ImmediateRetryCounter {
    /// Creates an empty counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Immediate retries recorded for `id`.
    #[must_use]
    pub fn get(&self, id: &MessageId) -> u32 {
        self.counts.get(id).map_or(0, |count| *count)
    }

    /// Records one more immediate retry and returns the new count.
    pub fn increment(&self, id: &MessageId) -> u32 {
        let mut count = self.counts.entry(id.clone()).or_insert(0);
        *count += 1;
        *count
    }

    /// Forgets `id`.
    pub fn clear(&self, id: &MessageId) {
        self.counts.remove(id);
    }

    /// Number of messages with a recorded count.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.counts.len()
    }
}

/// Delayed retries performed so far, as carried by the message's headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct DelayedRetryCount(u32);

impl DelayedRetryCount {
    /// Reads the count from `envelope`. A missing or unreadable header counts as zero.
    #[must_use]
    pub fn of(envelope: &MessageEnvelope) -> Self {
        Self(
            envelope
                .header(headers::DELAYED_RETRIES)
                .and_then(|value| value.parse().ok())
                .unwrap_or(0),
        )
    }

    /// The number of delayed retries already performed.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// The count after one more delayed retry.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns a copy of `envelope` carrying this count and the current time.
    #[must_use]
    pub fn apply_to(self, envelope: &MessageEnvelope) -> MessageEnvelope {
        envelope.with_headers([
            (headers::DELAYED_RETRIES, self.0.to_string()),
            (headers::DELAYED_RETRIES_TIMESTAMP, Utc::now().to_rfc3339()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;

    #[test]
    fn immediate_counts_are_per_message() {
        let counter = ImmediateRetryCounter::new();
        let first = MessageId::from("first");
        let second = MessageId::from("second");

        assert_eq!(counter.increment(&first), 1);
        assert_eq!(counter.increment(&first), 2);
        assert_eq!(counter.get(&second), 0);

        counter.clear(&first);
        assert_eq!(counter.get(&first), 0);
        assert_eq!(counter.tracked(), 0);
    }

    #[test]
    fn delayed_count_travels_in_headers() {
        let envelope = MessageEnvelope::builder(MessageType::new("Ping"), b"{}".to_vec()).build();
        assert_eq!(DelayedRetryCount::of(&envelope).get(), 0);

        let retried = DelayedRetryCount::of(&envelope).next().apply_to(&envelope);
        assert_eq!(DelayedRetryCount::of(&retried).get(), 1);
        assert!(retried.headers().contains(headers::DELAYED_RETRIES_TIMESTAMP));

        let garbled = envelope.with_header(headers::DELAYED_RETRIES, "many");
        assert_eq!(DelayedRetryCount::of(&garbled).get(), 0);
    }
}
