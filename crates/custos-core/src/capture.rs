//! Enrollment capture state machine.
//!
//! The operator must hold one quality-passing face inside the guide box for
//! a continuous dwell period. Any frame that breaks the condition resets the
//! dwell timer.

use crate::quality::{QualityVerdict, RejectReason};
use crate::sample::FaceSample;
use crate::types::Region;
use std::convert::Infallible;
use std::fmt;
use std::time::{Duration, Instant};

/// Default continuous dwell before a capture is accepted.
pub const DEFAULT_DWELL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureState {
    Idle,
    Dwelling { since: Instant },
    Captured(FaceSample),
    Cancelled,
}

impl CaptureState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CaptureState::Captured(_) | CaptureState::Cancelled)
    }
}

/// Operator-facing hint for the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Prompt {
    NoFace,
    MultipleFaces,
    Reposition,
    Quality(RejectReason),
    HoldStill { remaining: Duration },
    Captured,
    Cancelled,
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prompt::NoFace => f.write_str("no face detected"),
            Prompt::MultipleFaces => f.write_str("multiple faces detected"),
            Prompt::Reposition => f.write_str("position your face inside the guide area"),
            Prompt::Quality(reason) => write!(f, "{reason}"),
            Prompt::HoldStill { remaining } => {
                write!(f, "hold still ({:.1}s)", remaining.as_secs_f32())
            }
            Prompt::Captured => f.write_str("face captured"),
            Prompt::Cancelled => f.write_str("capture cancelled"),
        }
    }
}

/// Quality verdict plus the sample that would be captured if the verdict holds.
#[derive(Debug, Clone)]
pub struct Assessment {
    pub verdict: QualityVerdict,
    pub sample: FaceSample,
}

/// One enrollment attempt.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    state: CaptureState,
    guide: Region,
    required_dwell: Duration,
}

impl CaptureSession {
    pub fn new(guide: Region, required_dwell: Duration) -> Self {
        Self {
            state: CaptureState::Idle,
            guide,
            required_dwell,
        }
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    pub fn guide(&self) -> &Region {
        &self.guide
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    /// Abort the attempt. Has no effect once a capture has succeeded.
    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            tracing::info!("capture cancelled");
            self.state = CaptureState::Cancelled;
        }
    }

    /// Consume the captured sample, if the session ended in `Captured`.
    pub fn into_captured(self) -> Option<FaceSample> {
        match self.state {
            CaptureState::Captured(sample) => Some(sample),
            _ => None,
        }
    }

    /// Advance by one frame.
    ///
    /// `assess` is only invoked when exactly one region lies inside the guide
    /// box, so quality checks and normalization are skipped on frames that
    /// cannot lead to a capture.
    pub fn step<F>(&mut self, regions: &[Region], now: Instant, assess: F) -> Prompt
    where
        F: FnOnce(&Region) -> Assessment,
    {
        match self.try_step(regions, now, |region| Ok::<_, Infallible>(assess(region))) {
            Ok(prompt) => prompt,
            Err(never) => match never {},
        }
    }

    /// Like [`CaptureSession::step`], for assessments that can fail. A failed
    /// assessment resets the dwell timer and is handed back to the caller.
    pub fn try_step<F, E>(&mut self, regions: &[Region], now: Instant, assess: F) -> Result<Prompt, E>
    where
        F: FnOnce(&Region) -> Result<Assessment, E>,
    {
        match &self.state {
            CaptureState::Captured(_) => return Ok(Prompt::Captured),
            CaptureState::Cancelled => return Ok(Prompt::Cancelled),
            _ => {}
        }

        let region = match regions {
            [] => return Ok(self.reset(Prompt::NoFace)),
            [region] => region,
            _ => return Ok(self.reset(Prompt::MultipleFaces)),
        };

        if !self.guide.contains(region) {
            return Ok(self.reset(Prompt::Reposition));
        }

        let assessment = match assess(region) {
            Ok(assessment) => assessment,
            Err(e) => {
                self.state = CaptureState::Idle;
                return Err(e);
            }
        };
        if let QualityVerdict::Rejected(reason) = assessment.verdict {
            return Ok(self.reset(Prompt::Quality(reason)));
        }

        let prompt = match self.state {
            CaptureState::Dwelling { since } => {
                let elapsed = now.saturating_duration_since(since);
                if elapsed >= self.required_dwell {
                    tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "enrollment capture accepted");
                    self.state = CaptureState::Captured(assessment.sample);
                    Prompt::Captured
                } else {
                    Prompt::HoldStill {
                        remaining: self.required_dwell - elapsed,
                    }
                }
            }
            _ => {
                tracing::debug!("dwell started");
                self.state = CaptureState::Dwelling { since: now };
                Prompt::HoldStill {
                    remaining: self.required_dwell,
                }
            }
        };
        Ok(prompt)
    }

    fn reset(&mut self, prompt: Prompt) -> Prompt {
        if matches!(self.state, CaptureState::Dwelling { .. }) {
            tracing::debug!(%prompt, "dwell reset");
        }
        self.state = CaptureState::Idle;
        prompt
    }
}
