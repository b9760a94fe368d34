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

pub use address::Address;
pub use envelope::{EnvelopeBuilder, MessageEnvelope, MessageIntent};
pub use headers::Headers;
pub use message_id::MessageId;
pub use message_type::{message_type_of, Message, MessageType};

mod address;
mod envelope;
/// Well-known header keys and the [`Headers`] map.
pub mod headers;
mod message_id;
mod message_type;
