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

use std::sync::Arc;

use crate::common::{FailureKind, ProcessingFailure, UnrecoverablePredicate};

/// How the recoverability manager treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retry within the configured limits.
    Retryable,
    /// Skip retries and move straight to the error queue.
    Unrecoverable,
    /// Not a failure of the message: hand it back for redelivery without
    /// counting the attempt.
    Deferred,
}

/// Decides how a processing failure is treated.
pub trait FailureClassifier: Send + Sync + 'static {
    /// Classifies `failure`.
    fn classify(&self, failure: &ProcessingFailure) -> FailureClass;
}

/// Classification driven by configuration.
///
/// Cancellation is always deferred. Failures whose [`FailureKind`] is listed
/// as unrecoverable, or that match any predicate added with
/// [`unrecoverable_when`](Self::unrecoverable_when), skip retries. Everything
/// else is retried.
#[derive(Clone)]
pub struct DefaultClassifier {
    unrecoverable_kinds: Vec<FailureKind>,
    predicates: Vec<UnrecoverablePredicate>,
}

impl DefaultClassifier {
    /// A classifier that treats exactly `unrecoverable_kinds` as unrecoverable.
    #[must_use]
    pub fn new(unrecoverable_kinds: Vec<FailureKind>) -> Self {
        Self {
            unrecoverable_kinds,
            predicates: Vec::new(),
        }
    }

    /// Also treats any failure matching `predicate` as unrecoverable.
    #[must_use]
    pub fn unrecoverable_when(
        mut self,
        predicate: impl Fn(&ProcessingFailure) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicates.push(Arc::new(predicate));
        self
    }

    /// The kinds treated as unrecoverable.
    #[must_use]
    pub fn unrecoverable_kinds(&self) -> &[FailureKind] {
        &self.unrecoverable_kinds
    }
}

impl Default for DefaultClassifier {
    fn default() -> Self {
        Self::new(vec![FailureKind::Fatal, FailureKind::Routing])
    }
}

impl FailureClassifier for DefaultClassifier {
    fn classify(&self, failure: &ProcessingFailure) -> FailureClass {
        if failure.kind() == FailureKind::Cancelled {
            return FailureClass::Deferred;
        }
        if self.unrecoverable_kinds.contains(&failure.kind())
            || self.predicates.iter().any(|predicate| predicate(failure))
        {
            return FailureClass::Unrecoverable;
        }
        FailureClass::Retryable
    }
}

impl std::fmt::Debug for DefaultClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultClassifier")
            .field("unrecoverable_kinds", &self.unrecoverable_kinds)
            .field("predicates", &self.predicates.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_skip_retries_for_fatal_and_routing() {
        let classifier = DefaultClassifier::default();
        assert_eq!(
            classifier.classify(&ProcessingFailure::fatal("corrupt")),
            FailureClass::Unrecoverable
        );
        assert_eq!(
            classifier.classify(&ProcessingFailure::handler(anyhow::anyhow!("boom"))),
            FailureClass::Retryable
        );
        assert_eq!(
            classifier.classify(&ProcessingFailure::transient("timeout")),
            FailureClass::Retryable
        );
        assert_eq!(
            classifier.classify(&ProcessingFailure::Cancelled),
            FailureClass::Deferred
        );
    }

    #[test]
    fn predicates_can_reclassify_handler_failures() {
        let classifier = DefaultClassifier::default().unrecoverable_when(|failure| {
            matches!(failure, ProcessingFailure::Handler(error) if error.to_string().contains("invalid card"))
        });
        assert_eq!(
            classifier.classify(&ProcessingFailure::handler(anyhow::anyhow!("invalid card number"))),
            FailureClass::Unrecoverable
        );
        assert_eq!(
            classifier.classify(&ProcessingFailure::handler(anyhow::anyhow!("gateway busy"))),
            FailureClass::Retryable
        );
    }

    #[test]
    fn cancellation_is_never_unrecoverable() {
        let classifier = DefaultClassifier::new(vec![FailureKind::Cancelled]).unrecoverable_when(|_| true);
        assert_eq!(
            classifier.classify(&ProcessingFailure::Cancelled),
            FailureClass::Deferred
        );
    }
}
