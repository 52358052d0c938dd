//! Seams to the pixel-level vision capabilities.
//!
//! The pipeline only talks to these traits. [`crate::detector::ScrfdDetector`]
//! and [`crate::lbph::LbphClassifier`] are the shipped implementations.

use crate::detector::DetectorError;
use crate::error::{Classified, ErrorClass};
use crate::sample::FaceSample;
use crate::types::{FrameRef, Region};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("training set is empty — enroll at least one identity first")]
    EmptyTrainingSet,
    #[error("training set has {samples} samples but {labels} labels")]
    LabelMismatch { samples: usize, labels: usize },
    #[error("classifier has not been trained")]
    NotTrained,
    #[error("sample {width}x{height} is too small for the classifier")]
    SampleTooSmall { width: u32, height: u32 },
    #[error("model file {path}: {reason}")]
    ModelFile { path: String, reason: String },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

impl Classified for ClassifierError {
    fn class(&self) -> ErrorClass {
        match self {
            ClassifierError::InferenceFailed(_) => ErrorClass::Transient,
            _ => ErrorClass::Configuration,
        }
    }
}

/// Finds face regions in a grayscale frame.
pub trait FaceDetector {
    fn detect(&mut self, frame: &FrameRef<'_>) -> Result<Vec<Region>, DetectorError>;
}

/// Appearance model trained on labelled face samples.
pub trait Classifier {
    /// Replace the model with one trained on `samples`; `labels[i]` belongs to `samples[i]`.
    fn train(&mut self, samples: &[FaceSample], labels: &[i64]) -> Result<(), ClassifierError>;

    /// Nearest label and its distance (lower is closer). Returns
    /// [`crate::types::UNKNOWN_LABEL`] when nothing is within the model's threshold.
    fn classify(&self, sample: &FaceSample) -> Result<(i64, f32), ClassifierError>;

    fn is_trained(&self) -> bool;
}

/// Validate the shape of a training request before handing it to a model.
pub fn check_training_set(samples: &[FaceSample], labels: &[i64]) -> Result<(), ClassifierError> {
    if samples.is_empty() || labels.is_empty() {
        return Err(ClassifierError::EmptyTrainingSet);
    }
    if samples.len() != labels.len() {
        return Err(ClassifierError::LabelMismatch {
            samples: samples.len(),
            labels: labels.len(),
        });
    }
    Ok(())
}
