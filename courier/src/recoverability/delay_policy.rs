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

//! Delay computation for delayed retries.

use std::sync::Arc;
use std::time::Duration;

use crate::common::DelayFn;

/// How long a delayed retry waits before the transport redelivers the message.
///
/// Attempts are numbered from 1: the first delayed retry asks for
/// `delay_for(1)`.
#[derive(Clone)]
pub enum DelayPolicy {
    /// The same delay every time.
    Fixed(Duration),
    /// `initial + increment * (attempt - 1)`.
    Increasing {
        /// Delay of the first attempt.
        initial: Duration,
        /// Added for each further attempt.
        increment: Duration,
    },
    /// `initial * multiplier^(attempt - 1)`, never more than `max`.
    Exponential {
        /// Delay of the first attempt.
        initial: Duration,
        /// Growth factor.
        multiplier: f64,
        /// Cap.
        max: Duration,
    },
    /// Any function of the attempt number.
    Custom(DelayFn),
}

impl DelayPolicy {
    /// Wraps an arbitrary function.
    pub fn custom(f: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    /// The delay for the given 1-based attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let steps = attempt.saturating_sub(1);
        match self {
            Self::Fixed(delay) => *delay,
            Self::Increasing { initial, increment } => {
                initial.saturating_add(increment.saturating_mul(steps))
            }
            Self::Exponential {
                initial,
                multiplier,
                max,
            } => {
                #[allow(clippy::cast_precision_loss)]
                let delay_ms = initial.as_millis() as f64
                    * multiplier.powi(i32::try_from(steps).unwrap_or(i32::MAX));
                #[allow(
                    clippy::cast_sign_loss,
                    clippy::cast_possible_truncation,
                    clippy::cast_precision_loss
                )]
                let capped_ms = (delay_ms.min(max.as_millis() as f64).max(0.0)) as u64;
                Duration::from_millis(capped_ms)
            }
            Self::Custom(f) => f(attempt),
        }
    }
}

impl Default for DelayPolicy {
    fn default() -> Self {
        Self::Increasing {
            initial: Duration::from_secs(10),
            increment: Duration::from_secs(10),
        }
    }
}

impl PartialEq for DelayPolicy {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Fixed(a), Self::Fixed(b)) => a == b,
            (
                Self::Increasing {
                    initial: a,
                    increment: b,
                },
                Self::Increasing {
                    initial: c,
                    increment: d,
                },
            ) => a == c && b == d,
            (
                Self::Exponential {
                    initial: a,
                    multiplier: b,
                    max: c,
                },
                Self::Exponential {
                    initial: d,
                    multiplier: e,
                    max: f,
                },
            ) => a == d && b == e && c == f,
            (Self::Custom(a), Self::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for DelayPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
            Self::Increasing { initial, increment } => f
                .debug_struct("Increasing")
                .field("initial", initial)
                .field("increment", increment)
                .finish(),
            Self::Exponential {
                initial,
                multiplier,
                max,
            } => f
                .debug_struct("Exponential")
                .field("initial", initial)
                .field("multiplier", multiplier)
                .field("max", max)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
