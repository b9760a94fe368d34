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

//! Error taxonomy for message processing, routing, and the shared collaborators.
//!
//! [`ProcessingFailure`] is what a pipeline run produces when it does not
//! complete. Every variant maps onto a [`FailureKind`], which is what the
//! recoverability policy reasons about. The remaining enums are the errors of
//! individual subsystems; they convert into [`ProcessingFailure`] when they
//! surface inside a pipeline and into [`CourierError`] when they surface to a
//! caller of `send`/`publish`/`reply`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::MessageId;

/// Coarse classification of a processing failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// I/O timeout, transport unavailable, storage hiccup.
    Transient,
    /// The application handler returned an error.
    Handler,
    /// The message could not be routed (a programming error, not transient).
    Routing,
    /// No retry can fix this message (bad payload, no handler).
    Fatal,
    /// Processing observed the endpoint's cancellation signal.
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Handler => write!(f, "handler"),
            Self::Routing => write!(f, "routing"),
            Self::Fatal => write!(f, "fatal"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A pipeline run that did not complete.
#[derive(Debug, Error)]
pub enum ProcessingFailure {
    /// A transient condition outside the message itself.
    #[error("transient failure: {reason}")]
    Transient {
        /// Human readable description.
        reason: String,
    },
    /// The pipeline did not finish within the processing timeout.
    #[error("processing timed out after {0:?}")]
    Timeout(Duration),
    /// The transport rejected a send or was unavailable.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The outbox storage failed.
    #[error(transparent)]
    Outbox(#[from] OutboxError),
    /// A handler returned an error.
    #[error("handler failed: {0:#}")]
    Handler(anyhow::Error),
    /// An outgoing message could not be routed.
    #[error(transparent)]
    Routing(RoutingError),
    /// The body could not be decoded into the handler's message type.
    #[error("message body could not be deserialized: {0}")]
    Deserialization(#[source] serde_json::Error),
    /// Unrecoverable for any other reason.
    #[error("fatal failure: {reason}")]
    Fatal {
        /// Human readable description.
        reason: String,
    },
    /// Processing stopped at a step boundary because the endpoint is shutting down.
    #[error("processing was cancelled")]
    Cancelled,
}

impl ProcessingFailure {
    /// Wraps an application error raised by a handler.
    pub fn handler(error: impl Into<anyhow::Error>) -> Self {
        Self::Handler(error.into())
    }

    /// Builds a transient failure.
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }

    /// Builds a failure that skips retries.
    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal {
            reason: reason.into(),
        }
    }

    /// Converts an error returned by application code.
    ///
    /// Errors that originated in the runtime keep their classification, so a
    /// handler that propagates a failed `reply` with `?` fails with a routing
    /// failure rather than a retryable handler failure.
    pub fn from_handler_error(error: anyhow::Error) -> Self {
        match error.downcast::<CourierError>() {
            Ok(CourierError::Routing(error)) => Self::Routing(error),
            Ok(CourierError::Transport(error)) => Self::Transport(error),
            Ok(CourierError::Outbox(error)) => Self::Outbox(error),
            Ok(CourierError::Processing(failure)) => failure,
            Ok(other) => Self::Handler(other.into()),
            Err(error) => match error.downcast::<Self>() {
                Ok(failure) => failure,
                Err(error) => Self::Handler(error),
            },
        }
    }

    /// The taxonomy bucket this failure belongs to.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Transient { .. } | Self::Timeout(_) | Self::Transport(_) | Self::Outbox(_) => {
                FailureKind::Transient
            }
            Self::Handler(_) => FailureKind::Handler,
            Self::Routing(RoutingError::Subscriptions(_)) => FailureKind::Transient,
            Self::Routing(_) => FailureKind::Routing,
            Self::Deserialization(_) | Self::Fatal { .. } => FailureKind::Fatal,
            Self::Cancelled => FailureKind::Cancelled,
        }
    }
}

impl From<RoutingError> for ProcessingFailure {
    fn from(error: RoutingError) -> Self {
        Self::Routing(error)
    }
}

/// Reasons an outgoing message could not be given a destination.
#[derive(Debug, Error)]
pub enum RoutingError {
    /// A send had no explicit destination and no route matched its type.
    #[error("no destination specified for message type `{message_type}` and no route is configured")]
    NoDestinationSpecified {
        /// Name of the message type that could not be routed.
        message_type: String,
    },
    /// A reply was attempted for a message that carried no reply-to address.
    #[error("cannot reply to message `{message_id}`: it carries no reply-to address")]
    NoReplyToAddress {
        /// Identifier of the message being replied to.
        message_id: MessageId,
    },
    /// Subscriber lookup failed while routing a publish.
    #[error(transparent)]
    Subscriptions(#[from] SubscriptionError),
}

/// Errors raised while composing a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// Two steps were registered under the same name.
    #[error("a step named `{0}` is already registered")]
    DuplicateStep(String),
    /// A `before`/`after`/`replace`/`remove` anchor names no registered step.
    #[error("no step named `{0}` is registered")]
    UnknownStep(String),
    /// A step declared for one stage was registered into the other.
    #[error("step `{step}` belongs to the {declared} pipeline, not the {pipeline} pipeline")]
    StageMismatch {
        /// Offending step name.
        step: String,
        /// Stage the step declares.
        declared: String,
        /// Stage of the pipeline being built.
        pipeline: String,
    },
}

/// Errors reported by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The queue behind the address is gone.
    #[error("queue `{0}` is closed")]
    QueueClosed(String),
    /// The transport could not be reached.
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Errors reported by outbox storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutboxError {
    /// Another execution already committed a record for this message.
    #[error("an outbox record for message `{0}` has already been committed")]
    AlreadyCommitted(MessageId),
    /// No record exists for the message.
    #[error("no outbox record exists for message `{0}`")]
    RecordNotFound(MessageId),
    /// Backend failure.
    #[error("outbox storage failure: {0}")]
    Storage(String),
}

/// Errors reported by subscription storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    /// Backend failure.
    #[error("subscription storage failure: {0}")]
    Storage(String),
}

/// Errors raised when parsing an [`Address`](crate::message::Address).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// The input was empty or whitespace.
    #[error("address is empty")]
    Empty,
    /// Nothing preceded the `@`.
    #[error("address `{0}` has an empty queue name")]
    EmptyQueue(String),
    /// Nothing followed the `@`.
    #[error("address `{0}` has an empty machine name")]
    EmptyMachine(String),
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read configuration file: {0}")]
    Read(#[from] std::io::Error),
    /// The file is not valid TOML for [`CourierConfig`](crate::common::CourierConfig).
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// A configured address could not be parsed.
    #[error("invalid address `{value}` configured for `{key}`: {source}")]
    InvalidAddress {
        /// The setting that held the address.
        key: String,
        /// The raw value.
        value: String,
        /// Why it was rejected.
        source: AddressError,
    },
}

/// Errors surfaced to callers of the endpoint API.
#[derive(Debug, Error)]
pub enum CourierError {
    /// The message could not be routed. Never retried.
    #[error(transparent)]
    Routing(#[from] RoutingError),
    /// The message could not be serialized.
    #[error("failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The outgoing pipeline failed for a reason other than routing.
    #[error(transparent)]
    Processing(ProcessingFailure),
    /// A pipeline could not be composed.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    /// The subscription registry failed.
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
    /// The outbox failed.
    #[error(transparent)]
    Outbox(#[from] OutboxError),
    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The endpoint was started without a required collaborator.
    #[error("endpoint misconfigured: {0}")]
    Configuration(String),
    /// Configuration could not be loaded or applied.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// In-flight work did not drain before the shutdown timeout.
    #[error("endpoint did not shut down within {0:?}")]
    ShutdownTimeout(Duration),
}

impl From<ProcessingFailure> for CourierError {
    fn from(failure: ProcessingFailure) -> Self {
        match failure {
            ProcessingFailure::Routing(error) => Self::Routing(error),
            ProcessingFailure::Transport(error) => Self::Transport(error),
            other => Self::Processing(other),
        }
    }
}
