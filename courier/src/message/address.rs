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

//! Transport addresses in `queue[@machine]` form.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::common::AddressError;

/// The logical destination of a message: a queue, optionally qualified by the
/// machine that hosts it.
///
/// Machine names are compared case-insensitively, so `orders@HOST-1` and
/// `orders@host-1` name the same queue. Queue names are compared exactly.
#[derive(Debug, Clone)]
pub struct Address {
    queue: String,
    machine: Option<String>,
}

impl Address {
    /// Creates an unqualified address for `queue`.
    ///
    /// The name is taken as-is; use [`Address::parse`] for untrusted input.
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            machine: None,
        }
    }

    /// Parses `queue` or `queue@machine`.
    ///
    /// # Errors
    ///
    /// Returns an [`AddressError`] when the input is empty or either side of
    /// the `@` is empty.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(AddressError::Empty);
        }
        match trimmed.split_once('@') {
            Some((queue, _)) if queue.is_empty() => {
                Err(AddressError::EmptyQueue(trimmed.to_string()))
            }
            Some((_, machine)) if machine.is_empty() => {
                Err(AddressError::EmptyMachine(trimmed.to_string()))
            }
            Some((queue, machine)) => Ok(Self {
                queue: queue.to_string(),
                machine: Some(machine.to_string()),
            }),
            None => Ok(Self::new(trimmed)),
        }
    }

    /// Returns a copy of this address qualified with `machine`.
    #[must_use]
    pub fn at(&self, machine: impl Into<String>) -> Self {
        Self {
            queue: self.queue.clone(),
            machine: Some(machine.into()),
        }
    }

    /// Returns this address with any machine qualifier removed.
    #[must_use]
    pub fn unqualified(&self) -> Self {
        Self::new(self.queue.clone())
    }

    /// The queue name.
    #[inline]
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// The machine qualifier, if any.
    #[inline]
    #[must_use]
    pub fn machine(&self) -> Option<&str> {
        self.machine.as_deref()
    }

    /// True when the address is unqualified or names `machine`.
    #[must_use]
    pub fn is_local_to(&self, machine: &str) -> bool {
        self.machine
            .as_deref()
            .map_or(true, |own| own.eq_ignore_ascii_case(machine))
    }

    fn machine_key(&self) -> Option<String> {
        self.machine.as_deref().map(str::to_ascii_lowercase)
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.queue == other.queue
            && match (&self.machine, &other.machine) {
                (None, None) => true,
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                _ => false,
            }
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.queue.hash(state);
        self.machine_key().hash(state);
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> Ordering {
        self.queue
            .cmp(&other.queue)
            .then_with(|| self.machine_key().cmp(&other.machine_key()))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.machine {
            Some(machine) => write!(f, "{}@{}", self.queue, machine),
            None => f.write_str(&self.queue),
        }
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
