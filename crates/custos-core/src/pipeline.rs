//! Per-frame pipeline: detect, filter, gate, normalize, then either feed the
//! enrollment capture session or classify and resolve identities.

use crate::capture::{Assessment, CaptureSession, Prompt};
use crate::filter::filter_overlapping;
use crate::quality::{QualityGate, QualityVerdict, RejectReason};
use crate::recognizer::Recognizer;
use crate::resolver::{IdentityResolver, Resolution};
use crate::sample::{FaceSample, SampleError, NORMALIZED_SIZE};
use crate::store::{IdentityStore, SampleArchive};
use crate::types::{FrameRef, Prediction, Region};
use crate::vision::{Classifier, ClassifierError, FaceDetector};
use chrono::{DateTime, Utc};
use std::time::Instant;

/// What happened to one detected face during recognition.
#[derive(Debug, Clone, PartialEq)]
pub enum FaceOutcome {
    /// The raw crop failed the quality gate and was not classified.
    Rejected { region: Region, reason: RejectReason },
    /// Classified (or classification failed) without an accepted identity.
    Unrecognized {
        region: Region,
        prediction: Option<Prediction>,
    },
    Recognized { region: Region, resolution: Resolution },
}

impl FaceOutcome {
    pub fn region(&self) -> &Region {
        match self {
            FaceOutcome::Rejected { region, .. }
            | FaceOutcome::Unrecognized { region, .. }
            | FaceOutcome::Recognized { region, .. } => region,
        }
    }

    pub fn resolution(&self) -> Option<&Resolution> {
        match self {
            FaceOutcome::Recognized { resolution, .. } => Some(resolution),
            _ => None,
        }
    }
}

pub struct Pipeline<D, C> {
    detector: D,
    recognizer: Recognizer<C>,
    gate: QualityGate,
    resolver: IdentityResolver,
}

impl<D: FaceDetector, C: Classifier> Pipeline<D, C> {
    pub fn new(detector: D, recognizer: Recognizer<C>, gate: QualityGate, resolver: IdentityResolver) -> Self {
        Self {
            detector,
            recognizer,
            gate,
            resolver,
        }
    }

    pub fn recognizer(&self) -> &Recognizer<C> {
        &self.recognizer
    }

    pub fn gate(&self) -> &QualityGate {
        &self.gate
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    /// Detect faces and drop regions swallowed by a larger one.
    ///
    /// Detector failures are per-frame: logged, and the frame counts as faceless.
    pub fn regions(&mut self, frame: &FrameRef<'_>) -> Vec<Region> {
        match self.detector.detect(frame) {
            Ok(detected) => filter_overlapping(&detected),
            Err(e) => {
                tracing::warn!(error = %e, "face detection failed");
                Vec::new()
            }
        }
    }

    /// Gate the raw crop of `region` and produce the normalized sample.
    pub fn assess(&self, frame: &FrameRef<'_>, region: &Region) -> Result<Assessment, SampleError> {
        let raw = FaceSample::crop(frame, region)?;
        Ok(Assessment {
            verdict: self.gate.check(&raw, region),
            sample: raw.normalized(NORMALIZED_SIZE),
        })
    }

    /// Advance an enrollment capture by one frame.
    pub fn capture_step(
        &mut self,
        session: &mut CaptureSession,
        frame: &FrameRef<'_>,
        now: Instant,
    ) -> Result<Prompt, SampleError> {
        let regions = self.regions(frame);
        session.try_step(&regions, now, |region| self.assess(frame, region))
    }

    /// Retrain the classifier; the prediction cache is emptied as a side effect.
    pub fn train(&mut self, samples: &[FaceSample], labels: &[i64]) -> Result<(), ClassifierError> {
        self.recognizer.train(samples, labels)
    }

    /// Recognize every face in the frame, recording an event per accepted match.
    ///
    /// Failures on one face (crop, inference, store, archive) are logged and
    /// never stop the remaining faces or the frame loop.
    pub fn recognize<S, A>(
        &mut self,
        frame: &FrameRef<'_>,
        store: &mut S,
        archive: &mut A,
        occurred_at: DateTime<Utc>,
    ) -> Vec<FaceOutcome>
    where
        S: IdentityStore + ?Sized,
        A: SampleArchive + ?Sized,
    {
        let regions = self.regions(frame);
        let mut outcomes = Vec::with_capacity(regions.len());

        for region in regions {
            let assessment = match self.assess(frame, &region) {
                Ok(assessment) => assessment,
                Err(e) => {
                    tracing::warn!(error = %e, ?region, "could not crop face");
                    continue;
                }
            };
            if let QualityVerdict::Rejected(reason) = assessment.verdict {
                tracing::debug!(%reason, ?region, "face rejected by quality gate");
                outcomes.push(FaceOutcome::Rejected { region, reason });
                continue;
            }

            let prediction = match self.recognizer.predict(&assessment.sample) {
                Ok(prediction) => prediction,
                Err(e) => {
                    tracing::warn!(error = %e, ?region, "classification failed");
                    outcomes.push(FaceOutcome::Unrecognized {
                        region,
                        prediction: None,
                    });
                    continue;
                }
            };

            let sample = &assessment.sample;
            let resolved = self
                .resolver
                .resolve(store, prediction, occurred_at, || archive.archive(sample));

            outcomes.push(match resolved {
                Some(resolution) => FaceOutcome::Recognized { region, resolution },
                None => FaceOutcome::Unrecognized {
                    region,
                    prediction: Some(prediction),
                },
            });
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RecognitionCache;
    use crate::capture::{CaptureState, DEFAULT_DWELL};
    use crate::testing::{textured_frame, FakeClassifier, FakeDetector, MemoryArchive, MemoryStore};
    use std::time::Duration;

    const W: u32 = 640;
    const H: u32 = 480;

    fn face() -> Region {
        Region::new(250, 170, 140, 140).unwrap()
    }

    fn pipeline(regions: Vec<Region>, answer: Option<(i64, f32)>) -> Pipeline<FakeDetector, FakeClassifier> {
        let detector = FakeDetector { regions, fail: false };
        let classifier = FakeClassifier {
            answer,
            ..Default::default()
        };
        let mut pipeline = Pipeline::new(
            detector,
            Recognizer::new(classifier, RecognitionCache::default()),
            QualityGate::default(),
            IdentityResolver::default(),
        );
        let sample = FaceSample::new(vec![1; 4], 2, 2).unwrap();
        pipeline.train(&[sample], &[5]).unwrap();
        pipeline
    }

    fn store() -> MemoryStore {
        let mut store = MemoryStore::default();
        store.insert_with_id(5, "Ana Souza", "52998224725", "ana@example.com");
        store
    }

    #[test]
    fn test_recognize_records_accepted_match() {
        let data = textured_frame(W, H);
        let frame = FrameRef::new(&data, W, H);
        // Distance 10 -> similarity 90.
        let mut pipeline = pipeline(vec![face()], Some((5, 10.0)));
        let mut store = store();
        let mut archive = MemoryArchive::default();

        let outcomes = pipeline.recognize(&frame, &mut store, &mut archive, Utc::now());
        assert_eq!(outcomes.len(), 1);
        let resolution = outcomes[0].resolution().expect("recognized");
        assert_eq!(resolution.identity.id, 5);
        assert_eq!(resolution.event.confidence, 90.0);
        assert_eq!(resolution.event.sample_path, "recognitions/1.png");
        assert_eq!(store.events.len(), 1);
        assert_eq!(archive.archived[0].width(), NORMALIZED_SIZE);
    }

    #[test]
    fn test_archive_failure_leaves_log_untouched() {
        let data = textured_frame(W, H);
        let frame = FrameRef::new(&data, W, H);
        let mut pipeline = pipeline(vec![face()], Some((5, 10.0)));
        let mut store = store();
        let mut archive = MemoryArchive {
            fail: true,
            ..Default::default()
        };

        let outcomes = pipeline.recognize(&frame, &mut store, &mut archive, Utc::now());
        assert_eq!(
            outcomes,
            vec![FaceOutcome::Unrecognized {
                region: face(),
                prediction: Some(Prediction { label: 5, confidence: 90.0 }),
            }]
        );
        assert!(store.events.is_empty());
    }

    #[test]
    fn test_low_similarity_not_recorded() {
        let data = textured_frame(W, H);
        let frame = FrameRef::new(&data, W, H);
        let mut pipeline = pipeline(vec![face()], Some((5, 40.0)));
        let mut store = store();
        let mut archive = MemoryArchive::default();

        let outcomes = pipeline.recognize(&frame, &mut store, &mut archive, Utc::now());
        assert_eq!(
            outcomes,
            vec![FaceOutcome::Unrecognized {
                region: face(),
                prediction: Some(Prediction { label: 5, confidence: 60.0 }),
            }]
        );
        assert!(store.events.is_empty());
        assert!(archive.archived.is_empty());
    }

    #[test]
    fn test_quality_rejection_skips_classifier() {
        let data = textured_frame(W, H);
        let frame = FrameRef::new(&data, W, H);
        let small = Region::new(10, 10, 60, 60).unwrap();
        let mut pipeline = pipeline(vec![small], Some((5, 0.0)));
        let mut store = store();

        let outcomes = pipeline.recognize(&frame, &mut store, &mut MemoryArchive::default(), Utc::now());
        assert_eq!(
            outcomes,
            vec![FaceOutcome::Rejected {
                region: small,
                reason: RejectReason::TooClose,
            }]
        );
        assert_eq!(pipeline.recognizer().classifier().classify_calls.get(), 0);
    }

    #[test]
    fn test_inference_failure_keeps_going() {
        let data = textured_frame(W, H);
        let frame = FrameRef::new(&data, W, H);
        let mut pipeline = pipeline(vec![face()], None);
        let mut store = store();

        let outcomes = pipeline.recognize(&frame, &mut store, &mut MemoryArchive::default(), Utc::now());
        assert_eq!(
            outcomes,
            vec![FaceOutcome::Unrecognized {
                region: face(),
                prediction: None,
            }]
        );
        assert!(store.events.is_empty());
    }

    #[test]
    fn test_repeated_frame_hits_cache() {
        let data = textured_frame(W, H);
        let frame = FrameRef::new(&data, W, H);
        let mut pipeline = pipeline(vec![face()], Some((5, 50.0)));
        let mut store = store();
        let mut archive = MemoryArchive::default();

        pipeline.recognize(&frame, &mut store, &mut archive, Utc::now());
        pipeline.recognize(&frame, &mut store, &mut archive, Utc::now());
        assert_eq!(pipeline.recognizer().classifier().classify_calls.get(), 1);
    }

    #[test]
    fn test_detector_failure_is_faceless_frame() {
        let data = textured_frame(W, H);
        let frame = FrameRef::new(&data, W, H);
        let mut pipeline = pipeline(vec![face()], Some((5, 0.0)));
        pipeline.detector.fail = true;
        assert!(pipeline.regions(&frame).is_empty());
    }

    #[test]
    fn test_regions_are_filtered() {
        let data = textured_frame(W, H);
        let frame = FrameRef::new(&data, W, H);
        let inner = Region::new(260, 180, 100, 100).unwrap();
        let mut pipeline = pipeline(vec![inner, face()], None);
        assert_eq!(pipeline.regions(&frame), vec![face()]);
    }

    #[test]
    fn test_capture_step_dwells_then_captures() {
        let data = textured_frame(W, H);
        let frame = FrameRef::new(&data, W, H);
        let mut pipeline = pipeline(vec![face()], None);
        let mut session = CaptureSession::new(Region::centered(W, H, 300).unwrap(), DEFAULT_DWELL);

        let start = Instant::now();
        let first = pipeline.capture_step(&mut session, &frame, start).unwrap();
        assert_eq!(first, Prompt::HoldStill { remaining: DEFAULT_DWELL });
        let last = pipeline
            .capture_step(&mut session, &frame, start + DEFAULT_DWELL + Duration::from_millis(1))
            .unwrap();
        assert_eq!(last, Prompt::Captured);
        match session.state() {
            CaptureState::Captured(sample) => {
                assert_eq!((sample.width(), sample.height()), (NORMALIZED_SIZE, NORMALIZED_SIZE));
            }
            other => panic!("unexpected state {other:?}"),
        }
    }
}
