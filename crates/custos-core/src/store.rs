//! Persistence interfaces consumed by the pipeline.

use crate::error::{Classified, ErrorClass};
use crate::sample::FaceSample;
use crate::types::{Identity, NewIdentity, RecognitionEvent};
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("an identity with national id {0} is already enrolled")]
    DuplicateIdentity(String),
    #[error("national id {0:?} may only contain letters, digits, '-' and '_'")]
    InvalidNationalId(String),
    #[error("storage backend: {0}")]
    Backend(String),
    #[error("sample archive: {0}")]
    Archive(String),
}

impl Classified for StoreError {
    fn class(&self) -> ErrorClass {
        match self {
            StoreError::DuplicateIdentity(_) => ErrorClass::Integrity,
            StoreError::InvalidNationalId(_) => ErrorClass::Configuration,
            StoreError::Backend(_) | StoreError::Archive(_) => ErrorClass::Transient,
        }
    }
}

/// Enrolled identities plus the append-only recognition log.
pub trait IdentityStore {
    fn exists_by_national_id(&self, national_id: &str) -> Result<bool, StoreError>;

    /// Create an identity. Must re-check national id uniqueness atomically with
    /// the insert and fail with [`StoreError::DuplicateIdentity`] on conflict,
    /// leaving no partial record behind.
    fn enroll(&mut self, identity: NewIdentity) -> Result<Identity, StoreError>;

    fn find_by_id(&self, id: i64) -> Result<Option<Identity>, StoreError>;

    /// Append a recognition event. Returns `None` when the identity does not exist.
    fn record_recognition(
        &mut self,
        identity_id: i64,
        confidence: f32,
        sample_path: &str,
        occurred_at: DateTime<Utc>,
    ) -> Result<Option<RecognitionEvent>, StoreError>;

    /// Events with `start <= occurred_at <= end`, oldest first.
    fn recognitions_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RecognitionEvent>, StoreError>;

    /// All identities, ordered by id.
    fn identities(&self) -> Result<Vec<Identity>, StoreError>;
}

/// Destination for face samples attached to recognition events.
pub trait SampleArchive {
    /// Persist `sample` and return a reference to it (typically a file path).
    fn archive(&mut self, sample: &FaceSample) -> Result<String, StoreError>;
}
