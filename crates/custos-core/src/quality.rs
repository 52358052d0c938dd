//! Face crop quality gate.
//!
//! Checks run in a fixed priority order and the first failure wins, so the
//! operator is only ever told about one problem at a time.

use crate::sample::FaceSample;
use crate::types::Region;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tunable thresholds; adjust per deployment for lighting and camera placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    /// Minimum region width in pixels.
    pub min_face_size: u32,
    /// Maximum region width in pixels.
    pub max_face_size: u32,
    /// Minimum mean intensity of the crop.
    pub min_brightness: f32,
    /// Maximum mean intensity of the crop.
    pub max_brightness: f32,
    /// Minimum intensity standard deviation of the crop.
    pub min_contrast: f32,
    /// Aspect-ratio tolerance, in hundredths: `|1 - w/h|` may not exceed `max_angle / 100`.
    pub max_angle: f32,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_face_size: 100,
            max_face_size: 400,
            min_brightness: 20.0,
            max_brightness: 230.0,
            min_contrast: 15.0,
            max_angle: 30.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Region narrower than `min_face_size`; the person should come closer.
    TooClose,
    /// Region wider than `max_face_size`; the person should step back.
    TooFar,
    TooDark,
    TooBright,
    LowContrast,
    /// Aspect ratio too far from square, used as a proxy for head tilt.
    Tilted,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RejectReason::TooClose => "move closer to the camera",
            RejectReason::TooFar => "move away from the camera",
            RejectReason::TooDark => "environment too dark",
            RejectReason::TooBright => "environment too bright",
            RejectReason::LowContrast => "low contrast",
            RejectReason::Tilted => "keep your face straight",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityVerdict {
    Ok,
    Rejected(RejectReason),
}

impl QualityVerdict {
    pub fn is_ok(&self) -> bool {
        matches!(self, QualityVerdict::Ok)
    }
}

/// Stateless quality gate over a raw face crop and its region.
#[derive(Debug, Clone, Default)]
pub struct QualityGate {
    thresholds: QualityThresholds,
}

impl QualityGate {
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &QualityThresholds {
        &self.thresholds
    }

    pub fn check(&self, sample: &FaceSample, region: &Region) -> QualityVerdict {
        let t = &self.thresholds;

        if region.width() < t.min_face_size {
            return QualityVerdict::Rejected(RejectReason::TooClose);
        }
        if region.width() > t.max_face_size {
            return QualityVerdict::Rejected(RejectReason::TooFar);
        }

        let brightness = sample.mean();
        if brightness < t.min_brightness {
            return QualityVerdict::Rejected(RejectReason::TooDark);
        }
        if brightness > t.max_brightness {
            return QualityVerdict::Rejected(RejectReason::TooBright);
        }

        if sample.std_dev() < t.min_contrast {
            return QualityVerdict::Rejected(RejectReason::LowContrast);
        }

        let aspect = region.width() as f32 / region.height() as f32;
        if (1.0 - aspect).abs() > t.max_angle / 100.0 {
            return QualityVerdict::Rejected(RejectReason::Tilted);
        }

        QualityVerdict::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(w: u32, h: u32) -> Region {
        Region::new(0, 0, w, h).unwrap()
    }

    fn uniform(value: u8, w: u32, h: u32) -> FaceSample {
        FaceSample::new(vec![value; (w * h) as usize], w, h).unwrap()
    }

    /// Alternating 60/200 stripes: mean 130, std-dev 70.
    fn striped(w: u32, h: u32) -> FaceSample {
        let pixels = (0..w * h).map(|i| if i % 2 == 0 { 60 } else { 200 }).collect();
        FaceSample::new(pixels, w, h).unwrap()
    }

    #[test]
    fn test_uniform_gray_fails_contrast() {
        let gate = QualityGate::default();
        let verdict = gate.check(&uniform(128, 150, 150), &region(150, 150));
        assert_eq!(verdict, QualityVerdict::Rejected(RejectReason::LowContrast));
    }

    #[test]
    fn test_small_region_too_close_regardless_of_pixels() {
        let gate = QualityGate::default();
        for sample in [uniform(0, 50, 50), uniform(255, 50, 50), striped(50, 50)] {
            assert_eq!(
                gate.check(&sample, &region(50, 50)),
                QualityVerdict::Rejected(RejectReason::TooClose)
            );
        }
    }

    #[test]
    fn test_large_region_too_far() {
        let gate = QualityGate::default();
        assert_eq!(
            gate.check(&striped(10, 10), &region(401, 401)),
            QualityVerdict::Rejected(RejectReason::TooFar)
        );
    }

    #[test]
    fn test_size_bounds_inclusive() {
        let gate = QualityGate::default();
        assert!(gate.check(&striped(10, 10), &region(100, 100)).is_ok());
        assert!(gate.check(&striped(10, 10), &region(400, 400)).is_ok());
    }

    #[test]
    fn test_brightness_checks() {
        let gate = QualityGate::default();
        assert_eq!(
            gate.check(&uniform(10, 150, 150), &region(150, 150)),
            QualityVerdict::Rejected(RejectReason::TooDark)
        );
        assert_eq!(
            gate.check(&uniform(240, 150, 150), &region(150, 150)),
            QualityVerdict::Rejected(RejectReason::TooBright)
        );
    }

    #[test]
    fn test_dark_reported_before_contrast() {
        // Uniform dark crop fails both brightness and contrast; brightness wins.
        let gate = QualityGate::default();
        assert_eq!(
            gate.check(&uniform(5, 120, 120), &region(120, 120)),
            QualityVerdict::Rejected(RejectReason::TooDark)
        );
    }

    #[test]
    fn test_tilted_aspect_ratio() {
        let gate = QualityGate::default();
        // 150 / 100 = 1.5 -> |1 - 1.5| = 0.5 > 0.3
        assert_eq!(
            gate.check(&striped(150, 100), &region(150, 100)),
            QualityVerdict::Rejected(RejectReason::Tilted)
        );
        // 130 / 100 = 1.3 -> exactly at tolerance, accepted
        assert!(gate.check(&striped(130, 100), &region(130, 100)).is_ok());
    }

    #[test]
    fn test_custom_thresholds() {
        let gate = QualityGate::new(QualityThresholds {
            min_contrast: 0.0,
            ..QualityThresholds::default()
        });
        assert!(gate.check(&uniform(128, 150, 150), &region(150, 150)).is_ok());
    }

    #[test]
    fn test_reason_text() {
        assert_eq!(RejectReason::LowContrast.to_string(), "low contrast");
        assert_eq!(RejectReason::TooClose.to_string(), "move closer to the camera");
    }
}
