//! In-memory fakes shared by the unit tests.

use crate::detector::DetectorError;
use crate::sample::FaceSample;
use crate::store::{IdentityStore, SampleArchive, StoreError};
use crate::types::{FrameRef, Identity, NewIdentity, RecognitionEvent, Region};
use crate::vision::{check_training_set, Classifier, ClassifierError, FaceDetector};
use chrono::{DateTime, Utc};
use std::cell::Cell;

#[derive(Default)]
pub struct MemoryStore {
    pub identities: Vec<Identity>,
    pub events: Vec<RecognitionEvent>,
    pub fail_lookups: bool,
}

impl MemoryStore {
    pub fn insert_with_id(&mut self, id: i64, name: &str, national_id: &str, email: &str) {
        self.identities.push(Identity {
            id,
            name: name.into(),
            national_id: national_id.into(),
            email: email.into(),
            sample_paths: vec![format!("faces/{national_id}.png")],
            enrolled_at: Utc::now(),
        });
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.fail_lookups {
            return Err(StoreError::Backend("store offline".into()));
        }
        Ok(())
    }
}

impl IdentityStore for MemoryStore {
    fn exists_by_national_id(&self, national_id: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self.identities.iter().any(|i| i.national_id == national_id))
    }

    fn enroll(&mut self, identity: NewIdentity) -> Result<Identity, StoreError> {
        if self.exists_by_national_id(&identity.national_id)? {
            return Err(StoreError::DuplicateIdentity(identity.national_id));
        }
        let id = self.identities.iter().map(|i| i.id).max().unwrap_or(0) + 1;
        let enrolled = Identity {
            id,
            name: identity.name,
            national_id: identity.national_id,
            email: identity.email,
            sample_paths: identity.sample_paths,
            enrolled_at: Utc::now(),
        };
        self.identities.push(enrolled.clone());
        Ok(enrolled)
    }

    fn find_by_id(&self, id: i64) -> Result<Option<Identity>, StoreError> {
        self.check_available()?;
        Ok(self.identities.iter().find(|i| i.id == id).cloned())
    }

    fn record_recognition(
        &mut self,
        identity_id: i64,
        confidence: f32,
        sample_path: &str,
        occurred_at: DateTime<Utc>,
    ) -> Result<Option<RecognitionEvent>, StoreError> {
        let Some(identity) = self.find_by_id(identity_id)? else {
            return Ok(None);
        };
        let event = RecognitionEvent::for_identity(&identity, confidence, sample_path.into(), occurred_at);
        self.events.push(event.clone());
        Ok(Some(event))
    }

    fn recognitions_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RecognitionEvent>, StoreError> {
        self.check_available()?;
        let mut events: Vec<RecognitionEvent> = self
            .events
            .iter()
            .filter(|e| start <= e.occurred_at && e.occurred_at <= end)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.occurred_at);
        Ok(events)
    }

    fn identities(&self) -> Result<Vec<Identity>, StoreError> {
        self.check_available()?;
        let mut all = self.identities.clone();
        all.sort_by_key(|i| i.id);
        Ok(all)
    }
}

/// Returns `answer` for every sample; `None` simulates an inference failure.
#[derive(Default)]
pub struct FakeClassifier {
    pub answer: Option<(i64, f32)>,
    pub classify_calls: Cell<usize>,
    pub trained: bool,
}

impl Classifier for FakeClassifier {
    fn train(&mut self, samples: &[FaceSample], labels: &[i64]) -> Result<(), ClassifierError> {
        check_training_set(samples, labels)?;
        self.trained = true;
        Ok(())
    }

    fn classify(&self, _sample: &FaceSample) -> Result<(i64, f32), ClassifierError> {
        self.classify_calls.set(self.classify_calls.get() + 1);
        self.answer
            .ok_or_else(|| ClassifierError::InferenceFailed("fake failure".into()))
    }

    fn is_trained(&self) -> bool {
        self.trained
    }
}

/// Returns a fixed list of regions, or an inference error when `fail` is set.
#[derive(Default)]
pub struct FakeDetector {
    pub regions: Vec<Region>,
    pub fail: bool,
}

impl FaceDetector for FakeDetector {
    fn detect(&mut self, _frame: &FrameRef<'_>) -> Result<Vec<Region>, DetectorError> {
        if self.fail {
            return Err(DetectorError::InferenceFailed("fake failure".into()));
        }
        Ok(self.regions.clone())
    }
}

/// Records archived samples and hands out sequential references.
#[derive(Default)]
pub struct MemoryArchive {
    pub archived: Vec<FaceSample>,
    pub fail: bool,
}

impl SampleArchive for MemoryArchive {
    fn archive(&mut self, sample: &FaceSample) -> Result<String, StoreError> {
        if self.fail {
            return Err(StoreError::Archive("disk full".into()));
        }
        self.archived.push(sample.clone());
        Ok(format!("recognitions/{}.png", self.archived.len()))
    }
}

/// Frame whose rows ramp in brightness, giving crops enough contrast to pass
/// the quality gate.
pub fn textured_frame(width: u32, height: u32) -> Vec<u8> {
    (0..height)
        .flat_map(|y| (0..width).map(move |x| (((x * 7 + y * 13) % 160) + 40) as u8))
        .collect()
}
