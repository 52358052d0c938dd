//! Bounded memo of classifier output keyed by sample fingerprint.
//!
//! Entries are evicted in insertion order. The cache must be cleared whenever
//! the classifier is retrained, otherwise stale labels from the previous model
//! are returned.

use crate::sample::{FaceSample, Fingerprint};
use crate::types::Prediction;
use std::collections::{HashMap, VecDeque};

/// Default number of fingerprints kept.
pub const DEFAULT_CAPACITY: usize = 100;

/// Confidence values are clamped into this range before caching.
const CONFIDENCE_RANGE: (f32, f32) = (0.0, 100.0);

#[derive(Debug, Clone)]
pub struct RecognitionCache {
    entries: HashMap<Fingerprint, Prediction>,
    order: VecDeque<Fingerprint>,
    capacity: usize,
}

impl Default for RecognitionCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl RecognitionCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity + 1),
            order: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.contains_key(fingerprint)
    }

    /// Return the cached prediction for `sample`, or run `infer` and cache its result.
    ///
    /// `infer` yields `(label, raw_confidence)`. The confidence is clamped to
    /// [0, 100]. On error nothing is cached and the error is handed back.
    pub fn get_or_compute<F, E>(&mut self, sample: &FaceSample, infer: F) -> Result<Prediction, E>
    where
        F: FnOnce(&FaceSample) -> Result<(i64, f32), E>,
    {
        let fingerprint = sample.fingerprint();
        if let Some(hit) = self.entries.get(&fingerprint) {
            return Ok(*hit);
        }

        let (label, raw) = infer(sample)?;
        let confidence = if raw.is_nan() {
            CONFIDENCE_RANGE.0
        } else {
            raw.clamp(CONFIDENCE_RANGE.0, CONFIDENCE_RANGE.1)
        };
        let prediction = Prediction { label, confidence };

        self.entries.insert(fingerprint, prediction);
        self.order.push_back(fingerprint);
        while self.entries.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }

        Ok(prediction)
    }

    /// Drop every entry. Called after each retrain.
    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            tracing::debug!(entries = self.entries.len(), "recognition cache cleared");
        }
        self.entries.clear();
        self.order.clear();
    }
}
