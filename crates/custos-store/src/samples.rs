//! Face sample files: enrollment samples, archived recognition samples, and
//! training-set assembly.

use custos_core::{FaceSample, Identity, SampleArchive, StoreError};
use image::GrayImage;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const FACES_DIR: &str = "faces";
const RECOGNITIONS_DIR: &str = "recognitions";

fn archive_err(context: impl std::fmt::Display, e: impl std::fmt::Display) -> StoreError {
    StoreError::Archive(format!("{context}: {e}"))
}

/// Reject national ids that cannot name a sample file.
///
/// Call before capture so a bad id never costs the operator a capture attempt.
pub fn validate_national_id(national_id: &str) -> Result<(), StoreError> {
    let usable = !national_id.is_empty()
        && national_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if usable {
        Ok(())
    } else {
        Err(StoreError::InvalidNationalId(national_id.to_string()))
    }
}

/// Samples and labels ready for `Classifier::train`.
#[derive(Debug, Default)]
pub struct TrainingSet {
    pub samples: Vec<FaceSample>,
    pub labels: Vec<i64>,
    /// Sample files that were missing or unreadable.
    pub skipped: usize,
}

impl TrainingSet {
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Directory tree holding `faces/<national_id>.png` and `recognitions/<uuid>.png`.
#[derive(Debug, Clone)]
pub struct SampleDir {
    root: PathBuf,
}

impl SampleDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write the enrollment sample for `national_id`, returning its path.
    /// Never overwrites an existing sample.
    pub fn save_enrollment(&self, national_id: &str, sample: &FaceSample) -> Result<String, StoreError> {
        validate_national_id(national_id)?;
        let path = self.root.join(FACES_DIR).join(format!("{national_id}.png"));
        if path.exists() {
            return Err(StoreError::Archive(format!("{} already exists", path.display())));
        }
        write_png(&path, sample)?;
        tracing::info!(path = %path.display(), "enrollment sample saved");
        Ok(path.display().to_string())
    }

    /// Read a grayscale sample back from disk.
    pub fn load(path: &Path) -> Result<FaceSample, StoreError> {
        let img = image::open(path)
            .map_err(|e| archive_err(path.display(), e))?
            .to_luma8();
        let (width, height) = img.dimensions();
        FaceSample::new(img.into_raw(), width, height).map_err(|e| archive_err(path.display(), e))
    }

    /// Load every enrolled sample, labelled with its identity id.
    ///
    /// Missing or unreadable files are skipped with a warning.
    pub fn training_set(identities: &[Identity]) -> TrainingSet {
        let mut set = TrainingSet::default();
        for identity in identities {
            for path in &identity.sample_paths {
                match Self::load(Path::new(path)) {
                    Ok(sample) => {
                        set.samples.push(sample);
                        set.labels.push(identity.id);
                    }
                    Err(e) => {
                        tracing::warn!(identity = identity.id, error = %e, "skipping enrollment sample");
                        set.skipped += 1;
                    }
                }
            }
        }
        tracing::info!(samples = set.samples.len(), skipped = set.skipped, "training set loaded");
        set
    }
}

impl SampleArchive for SampleDir {
    fn archive(&mut self, sample: &FaceSample) -> Result<String, StoreError> {
        let path = self
            .root
            .join(RECOGNITIONS_DIR)
            .join(format!("{}.png", Uuid::new_v4()));
        write_png(&path, sample)?;
        tracing::debug!(path = %path.display(), "recognition sample archived");
        Ok(path.display().to_string())
    }
}

fn write_png(path: &Path, sample: &FaceSample) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| archive_err(parent.display(), e))?;
    }
    let img = GrayImage::from_raw(sample.width(), sample.height(), sample.pixels().to_vec())
        .ok_or_else(|| StoreError::Archive(format!("sample buffer does not match {}x{}", sample.width(), sample.height())))?;
    img.save(path).map_err(|e| archive_err(path.display(), e))
}
