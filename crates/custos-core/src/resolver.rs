//! Confidence-threshold identity resolution.

use crate::store::{IdentityStore, StoreError};
use crate::types::{Identity, Prediction, RecognitionEvent, UNKNOWN_LABEL};
use chrono::{DateTime, Utc};

/// Default minimum confidence for a confirmed match.
pub const DEFAULT_ACCEPTANCE_THRESHOLD: f32 = 80.0;

/// A confirmed match and the event recorded for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub identity: Identity,
    pub event: RecognitionEvent,
}

#[derive(Debug, Clone)]
pub struct IdentityResolver {
    threshold: f32,
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new(DEFAULT_ACCEPTANCE_THRESHOLD)
    }
}

impl IdentityResolver {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Known label and confidence at or above the threshold.
    pub fn accepts(&self, label: i64, confidence: f32) -> bool {
        label != UNKNOWN_LABEL && confidence >= self.threshold
    }

    /// Map an accepted prediction to its identity and append one recognition event.
    ///
    /// Returns `None` for rejected predictions, for labels with no matching
    /// identity, and when the store fails. `sample_ref` is only called once the
    /// identity has been found; if it fails no event is recorded.
    pub fn resolve<S, F>(
        &self,
        store: &mut S,
        prediction: Prediction,
        occurred_at: DateTime<Utc>,
        sample_ref: F,
    ) -> Option<Resolution>
    where
        S: IdentityStore + ?Sized,
        F: FnOnce() -> Result<String, StoreError>,
    {
        let Prediction { label, confidence } = prediction;
        if !self.accepts(label, confidence) {
            return None;
        }

        let identity = match store.find_by_id(label) {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                tracing::warn!(label, "classifier label has no enrolled identity");
                return None;
            }
            Err(e) => {
                tracing::warn!(label, error = %e, "identity lookup failed");
                return None;
            }
        };

        let sample_path = match sample_ref() {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(label, error = %e, "recognition sample not archived; event dropped");
                return None;
            }
        };
        match store.record_recognition(identity.id, confidence, &sample_path, occurred_at) {
            Ok(Some(event)) => {
                tracing::info!(
                    identity = identity.id,
                    name = %identity.name,
                    confidence,
                    "identity recognized"
                );
                Some(Resolution { identity, event })
            }
            Ok(None) => {
                tracing::warn!(label, "identity vanished before the event was recorded");
                None
            }
            Err(e) => {
                tracing::warn!(label, error = %e, "failed to record recognition");
                None
            }
        }
    }
}
