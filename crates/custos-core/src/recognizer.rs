//! Owned classifier state: the trained model and its prediction cache.
//!
//! Training takes `&mut self`, so recognition can never run against a model
//! that is mid-retrain, and the cache is emptied before `train` returns.

use crate::cache::RecognitionCache;
use crate::sample::FaceSample;
use crate::types::Prediction;
use crate::vision::{check_training_set, Classifier, ClassifierError};

/// Upper end of the similarity scale derived from classifier distance.
const SIMILARITY_SCALE: f32 = 100.0;

/// Convert a classifier distance into a similarity score (higher is closer).
///
/// The result is not clamped here; the cache clamps it into [0, 100].
pub fn similarity_from_distance(distance: f32) -> f32 {
    SIMILARITY_SCALE - distance
}

pub struct Recognizer<C> {
    classifier: C,
    cache: RecognitionCache,
}

impl<C: Classifier> Recognizer<C> {
    pub fn new(classifier: C, cache: RecognitionCache) -> Self {
        Self { classifier, cache }
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    pub fn cache(&self) -> &RecognitionCache {
        &self.cache
    }

    pub fn is_trained(&self) -> bool {
        self.classifier.is_trained()
    }

    /// Retrain from scratch and invalidate every cached prediction.
    pub fn train(&mut self, samples: &[FaceSample], labels: &[i64]) -> Result<(), ClassifierError> {
        check_training_set(samples, labels)?;
        tracing::info!(samples = samples.len(), "training classifier");
        let result = self.classifier.train(samples, labels);
        // Even a failed train may have touched model state.
        self.cache.clear();
        result?;
        tracing::info!("classifier trained");
        Ok(())
    }

    /// Predict the label of a normalized sample, consulting the cache first.
    pub fn predict(&mut self, sample: &FaceSample) -> Result<Prediction, ClassifierError> {
        if !self.classifier.is_trained() {
            return Err(ClassifierError::NotTrained);
        }
        let classifier = &self.classifier;
        self.cache.get_or_compute(sample, |s| {
            classifier.classify(s).map(|(label, distance)| {
                tracing::debug!(label, distance, "classifier prediction");
                (label, similarity_from_distance(distance))
            })
        })
    }
}
