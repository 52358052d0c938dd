//! custos-core — face enrollment and recognition pipeline.
//!
//! Detection (SCRFD via ONNX Runtime) and classification (LBPH) sit behind
//! the [`FaceDetector`] and [`Classifier`] traits; everything between them,
//! from overlap filtering to identity resolution, is plain deterministic code.

pub mod cache;
pub mod capture;
pub mod detector;
pub mod error;
pub mod filter;
pub mod lbph;
pub mod metrics;
pub mod pipeline;
pub mod quality;
pub mod recognizer;
pub mod resolver;
pub mod sample;
pub mod store;
pub mod types;
pub mod vision;

#[cfg(test)]
mod testing;

pub use cache::RecognitionCache;
pub use capture::{CaptureSession, CaptureState, Prompt};
pub use detector::{DetectorError, ScrfdDetector};
pub use error::{Classified, ErrorClass};
pub use filter::filter_overlapping;
pub use lbph::{LbphClassifier, LbphParams};
pub use metrics::{evaluate_scenario, ScenarioMetrics};
pub use pipeline::{FaceOutcome, Pipeline};
pub use quality::{QualityGate, QualityThresholds, QualityVerdict, RejectReason};
pub use recognizer::Recognizer;
pub use resolver::{IdentityResolver, Resolution};
pub use sample::{FaceSample, SampleError};
pub use store::{IdentityStore, SampleArchive, StoreError};
pub use types::{FrameRef, Identity, NewIdentity, Prediction, RecognitionEvent, Region, UNKNOWN_LABEL};
pub use vision::{Classifier, ClassifierError, FaceDetector};
