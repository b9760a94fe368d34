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

//! Message type descriptors and the [`Message`] trait.
//!
//! A [`MessageType`] carries its name plus the flattened list of every declared
//! supertype. The list is computed once, when the descriptor is built, so
//! polymorphic lookups (a subscriber to `OrderEvent` receiving `OrderPlaced`)
//! are a scan over a short slice rather than a walk over a type graph.

use std::any::TypeId;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Describes a message type and its ancestry.
///
/// Equality compares the name, the ancestors and the event flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageType {
    name: Arc<str>,
    ancestors: Arc<[Arc<str>]>,
    is_event: bool,
}

impl MessageType {
    /// Creates a descriptor with no supertypes.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            ancestors: Arc::from(Vec::new()),
            is_event: false,
        }
    }

    /// Declares `parent` as a supertype.
    ///
    /// The parent and all of the parent's own ancestors are appended, in order,
    /// skipping anything already present and the type itself.
    #[must_use]
    pub fn implements(self, parent: Self) -> Self {
        let mut merged: Vec<Arc<str>> = self.ancestors.iter().cloned().collect();
        for candidate in std::iter::once(&parent.name).chain(parent.ancestors.iter()) {
            if candidate.as_ref() != self.name.as_ref()
                && !merged.iter().any(|existing| existing == candidate)
            {
                merged.push(candidate.clone());
            }
        }
        Self {
            ancestors: Arc::from(merged),
            ..self
        }
    }

    /// Marks the type as an event: something published rather than sent.
    #[must_use]
    pub const fn as_event(mut self) -> Self {
        self.is_event = true;
        self
    }

    /// The type's own name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All declared supertypes, nearest first.
    pub fn ancestors(&self) -> impl Iterator<Item = &str> {
        self.ancestors.iter().map(AsRef::as_ref)
    }

    /// The type's own name followed by its ancestors.
    pub fn lineage(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name()).chain(self.ancestors())
    }

    /// True when this type is `name` or derives from it.
    #[must_use]
    pub fn is_assignable_to(&self, name: &str) -> bool {
        self.lineage().any(|candidate| candidate == name)
    }

    /// True when the type was declared as an event.
    #[inline]
    #[must_use]
    pub const fn is_event(&self) -> bool {
        self.is_event
    }

    /// Renders the lineage for the enclosed-message-types header.
    #[must_use]
    pub fn to_header_value(&self) -> String {
        self.lineage().collect::<Vec<_>>().join(";")
    }

    /// Rebuilds a descriptor from an enclosed-message-types header value.
    ///
    /// Returns `None` when the value carries no type name.
    #[must_use]
    pub fn from_header_value(value: &str) -> Option<Self> {
        let mut parts = value.split(';').map(str::trim).filter(|p| !p.is_empty());
        let name = parts.next()?;
        let ancestors: Vec<Arc<str>> = parts.map(Arc::from).collect();
        Some(Self {
            name: Arc::from(name),
            ancestors: Arc::from(ancestors),
            is_event: false,
        })
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Serialize, Deserialize)]
struct MessageTypeRepr {
    lineage: String,
    #[serde(default)]
    event: bool,
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        MessageTypeRepr {
            lineage: self.to_header_value(),
            event: self.is_event,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = MessageTypeRepr::deserialize(deserializer)?;
        let mut message_type = Self::from_header_value(&repr.lineage)
            .ok_or_else(|| serde::de::Error::custom("message type lineage is empty"))?;
        message_type.is_event = repr.event;
        Ok(message_type)
    }
}

/// A type that can travel through the bus.
///
/// Implemented by `#[courier_message]`. Bodies are encoded as JSON.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Builds the descriptor for this type.
    ///
    /// Prefer [`message_type_of`], which caches the result.
    fn message_type() -> MessageType;
}

static MESSAGE_TYPES: OnceLock<DashMap<TypeId, MessageType>> = OnceLock::new();

/// Returns the cached descriptor for `M`, building it on first use.
pub fn message_type_of<M: Message>() -> MessageType {
    let cache = MESSAGE_TYPES.get_or_init(DashMap::new);
    cache
        .entry(TypeId::of::<M>())
        .or_insert_with(M::message_type)
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hierarchy() -> MessageType {
        let event = MessageType::new("IEvent");
        let order_event = MessageType::new("OrderEvent").implements(event.clone());
        MessageType::new("OrderPlaced")
            .implements(order_event)
            .implements(event)
            .as_event()
    }

    #[test]
    fn ancestors_are_flattened_without_duplicates() {
        let placed = hierarchy();
        assert_eq!(
            placed.ancestors().collect::<Vec<_>>(),
            vec!["OrderEvent", "IEvent"]
        );
        assert!(placed.is_assignable_to("IEvent"));
        assert!(placed.is_assignable_to("OrderPlaced"));
        assert!(!placed.is_assignable_to("Invoice"));
        assert!(placed.is_event());
    }

    #[test]
    fn a_type_never_lists_itself_as_ancestor() {
        let cyclic = MessageType::new("A").implements(MessageType::new("B").implements(MessageType::new("A")));
        assert_eq!(cyclic.ancestors().collect::<Vec<_>>(), vec!["B"]);
    }

    #[test]
    fn header_value_preserves_lineage() {
        let placed = hierarchy();
        let header = placed.to_header_value();
        assert_eq!(header, "OrderPlaced;OrderEvent;IEvent");

        let parsed = MessageType::from_header_value(&header).unwrap();
        assert_eq!(parsed.name(), "OrderPlaced");
        assert_eq!(parsed.ancestors().count(), 2);
        assert!(MessageType::from_header_value(" ; ").is_none());
    }
}
