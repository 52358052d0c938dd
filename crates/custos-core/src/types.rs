use crate::error::{Classified, ErrorClass};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Label returned by a classifier when no enrolled identity is close enough.
pub const UNKNOWN_LABEL: i64 = -1;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegionError {
    #[error("region has empty dimensions: {width}x{height}")]
    EmptyDimensions { width: u32, height: u32 },
}

impl Classified for RegionError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Configuration
    }
}

/// Axis-aligned face bounding box in frame pixel coordinates.
///
/// Width and height are always non-zero; use [`Region::new`] to build one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    x: i32,
    y: i32,
    width: u32,
    height: u32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Result<Self, RegionError> {
        if width == 0 || height == 0 {
            return Err(RegionError::EmptyDimensions { width, height });
        }
        Ok(Self { x, y, width, height })
    }

    /// Square region of `size` centered in a `frame_width` x `frame_height` frame.
    pub fn centered(frame_width: u32, frame_height: u32, size: u32) -> Result<Self, RegionError> {
        let x = (frame_width as i64 - size as i64) / 2;
        let y = (frame_height as i64 - size as i64) / 2;
        Self::new(x as i32, y as i32, size, size)
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Area of the rectangle shared with `other` (zero when disjoint).
    pub fn intersection_area(&self, other: &Region) -> u64 {
        let x_overlap = (self.right().min(other.right()) - (self.x as i64).max(other.x as i64)).max(0);
        let y_overlap =
            (self.bottom().min(other.bottom()) - (self.y as i64).max(other.y as i64)).max(0);
        (x_overlap * y_overlap) as u64
    }

    /// True when `inner` lies entirely within this region (edges may touch).
    pub fn contains(&self, inner: &Region) -> bool {
        self.x <= inner.x
            && inner.right() <= self.right()
            && self.y <= inner.y
            && inner.bottom() <= self.bottom()
    }
}

/// Borrowed 8-bit grayscale frame, row-major, `width * height` bytes.
#[derive(Debug, Clone, Copy)]
pub struct FrameRef<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
}

impl<'a> FrameRef<'a> {
    pub fn new(data: &'a [u8], width: u32, height: u32) -> Self {
        Self { data, width, height }
    }
}

/// Classifier output after the cache has clamped the confidence into [0, 100].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: i64,
    pub confidence: f32,
}

impl Prediction {
    pub fn is_unknown(&self) -> bool {
        self.label == UNKNOWN_LABEL
    }
}

/// Enrollment request handed to the store once a capture succeeds.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub name: String,
    pub national_id: String,
    pub email: String,
    pub sample_paths: Vec<String>,
}

/// A durably enrolled person. The id doubles as the classifier label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: i64,
    pub name: String,
    pub national_id: String,
    pub email: String,
    pub sample_paths: Vec<String>,
    pub enrolled_at: DateTime<Utc>,
}

/// One confirmed recognition, denormalized with the identity fields at the time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionEvent {
    pub identity_id: i64,
    pub name: String,
    pub national_id: String,
    pub email: String,
    pub confidence: f32,
    pub sample_path: String,
    pub occurred_at: DateTime<Utc>,
}

impl RecognitionEvent {
    pub fn for_identity(
        identity: &Identity,
        confidence: f32,
        sample_path: String,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            identity_id: identity.id,
            name: identity.name.clone(),
            national_id: identity.national_id.clone(),
            email: identity.email.clone(),
            confidence,
            sample_path,
            occurred_at,
        }
    }
}
