//! Frame loops for enrollment capture and monitoring.
//!
//! Both loops are synchronous and frame-by-frame; callers run them on a
//! blocking task and cancel them through a shared flag polled once per frame.

use crate::notify::{self, Notice, Notifier};
use custos_core::{
    CaptureSession, Classifier, ClassifierError, DetectorError, FaceDetector, FaceOutcome, FaceSample,
    IdentityStore, Pipeline, Prompt, Resolution, SampleArchive, StoreError,
};
use custos_hw::{CameraError, Frame, FrameStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use thiserror::Error;

/// Consecutive failed frame reads tolerated before giving up on the camera.
const MAX_CONSECUTIVE_CAMERA_FAILURES: usize = 10;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("classifier error: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("camera failed {0} times in a row")]
    CameraLost(usize),
}

/// Anything that yields grayscale frames one at a time.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame, CameraError>;
}

impl FrameSource for FrameStream<'_> {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        FrameStream::next_frame(self)
    }
}

/// Counts consecutive transient camera failures.
struct FailureBudget {
    consecutive: usize,
}

impl FailureBudget {
    fn new() -> Self {
        Self { consecutive: 0 }
    }

    fn read<S: FrameSource>(&mut self, source: &mut S) -> Result<Option<Frame>, EngineError> {
        match source.next_frame() {
            Ok(frame) => {
                self.consecutive = 0;
                Ok(Some(frame))
            }
            Err(e) => {
                self.consecutive += 1;
                tracing::warn!(error = %e, failures = self.consecutive, "frame capture failed");
                if self.consecutive >= MAX_CONSECUTIVE_CAMERA_FAILURES {
                    return Err(EngineError::CameraLost(self.consecutive));
                }
                Ok(None)
            }
        }
    }
}

/// Reject an enrollment before the camera opens: the national id must name a
/// sample file and must not already be enrolled.
pub fn precheck_enrollment<St>(store: &St, national_id: &str) -> Result<(), EngineError>
where
    St: IdentityStore + ?Sized,
{
    custos_store::validate_national_id(national_id)?;
    if store.exists_by_national_id(national_id)? {
        return Err(StoreError::DuplicateIdentity(national_id.to_string()).into());
    }
    Ok(())
}

/// Run a capture session until it captures or `cancel` is raised.
///
/// `on_prompt` is called whenever the operator prompt changes. Returns the
/// captured (normalized) sample, or `None` when cancelled.
pub fn run_capture<S, D, C>(
    source: &mut S,
    pipeline: &mut Pipeline<D, C>,
    session: &mut CaptureSession,
    cancel: &AtomicBool,
    mut on_prompt: impl FnMut(&Prompt),
) -> Result<Option<FaceSample>, EngineError>
where
    S: FrameSource,
    D: FaceDetector,
    C: Classifier,
{
    let mut budget = FailureBudget::new();
    let mut last_prompt: Option<Prompt> = None;

    while !session.is_finished() {
        if cancel.load(Ordering::Relaxed) {
            session.cancel();
            break;
        }
        let Some(frame) = budget.read(source)? else {
            continue;
        };

        let prompt = match pipeline.capture_step(session, &frame.as_frame_ref(), Instant::now()) {
            Ok(prompt) => prompt,
            Err(e) => {
                tracing::warn!(error = %e, seq = frame.sequence, "could not assess face");
                continue;
            }
        };
        if prompt_changed(last_prompt.as_ref(), &prompt) {
            on_prompt(&prompt);
        }
        last_prompt = Some(prompt);
    }

    Ok(match session.state() {
        custos_core::CaptureState::Captured(sample) => Some(sample.clone()),
        _ => None,
    })
}

/// Hold-still countdowns count as one prompt so the operator is not flooded.
fn prompt_changed(last: Option<&Prompt>, next: &Prompt) -> bool {
    match (last, next) {
        (Some(Prompt::HoldStill { .. }), Prompt::HoldStill { .. }) => false,
        (Some(last), next) => last != next,
        (None, _) => true,
    }
}

/// Recognize faces frame by frame until the first confirmed match or `cancel`.
pub fn run_monitor<S, D, C, St, A>(
    source: &mut S,
    pipeline: &mut Pipeline<D, C>,
    store: &mut St,
    archive: &mut A,
    notifier: &dyn Notifier,
    cancel: &AtomicBool,
) -> Result<Option<Resolution>, EngineError>
where
    S: FrameSource,
    D: FaceDetector,
    C: Classifier,
    St: IdentityStore + ?Sized,
    A: SampleArchive + ?Sized,
{
    let mut budget = FailureBudget::new();
    let mut frames = 0u64;

    while !cancel.load(Ordering::Relaxed) {
        let Some(frame) = budget.read(source)? else {
            continue;
        };
        frames += 1;
        if frame.is_dark {
            continue;
        }

        let outcomes = pipeline.recognize(&frame.as_frame_ref(), store, archive, chrono::Utc::now());
        if let Some(resolution) = outcomes.into_iter().find_map(|o| match o {
            FaceOutcome::Recognized { resolution, .. } => Some(resolution),
            _ => None,
        }) {
            tracing::info!(frames, identity = resolution.identity.id, "monitor stopping at first match");
            notify::send(notifier, &Notice::recognized(&resolution.event));
            return Ok(Some(resolution));
        }
    }

    tracing::info!(frames, "monitor cancelled");
    Ok(None)
}
