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

use std::collections::BTreeMap;

use crate::message::{Address, MessageType};

/// Conventional destinations for sent messages, keyed by message type name.
///
/// A type without its own route uses the route of its nearest ancestor that
/// has one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTable {
    routes: BTreeMap<String, Address>,
}

impl RouteTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes `message_type` to `destination`, replacing any previous route.
    pub fn insert(&mut self, message_type: impl Into<String>, destination: Address) -> Option<Address> {
        self.routes.insert(message_type.into(), destination)
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with_route(mut self, message_type: impl Into<String>, destination: Address) -> Self {
        self.insert(message_type, destination);
        self
    }

    /// Adds every route of `other`, letting `other` win on conflicts.
    pub fn merge(&mut self, other: Self) {
        self.routes.extend(other.routes);
    }

    /// The route registered for exactly `message_type`.
    #[must_use]
    pub fn get(&self, message_type: &str) -> Option<&Address> {
        self.routes.get(message_type)
    }

    /// The route for `message_type`: its own, or its nearest ancestor's.
    #[must_use]
    pub fn resolve(&self, message_type: &MessageType) -> Option<&Address> {
        message_type.lineage().find_map(|name| self.routes.get(name))
    }

    /// Number of routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// True when no route is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_route_wins_over_ancestors() {
        let command = MessageType::new("Command");
        let charge = MessageType::new("ChargeCard").implements(command.clone());
        let refund = MessageType::new("Refund").implements(command);

        let table = RouteTable::new()
            .with_route("Command", Address::new("commands"))
            .with_route("ChargeCard", Address::new("billing"));

        assert_eq!(table.resolve(&charge), Some(&Address::new("billing")));
        assert_eq!(table.resolve(&refund), Some(&Address::new("commands")));
        assert_eq!(table.resolve(&MessageType::new("Other")), None);
    }
}
