//! Grayscale frames and raw buffer conversion.

use custos_core::error::{Classified, ErrorClass};
use custos_core::FrameRef;
use std::time::Instant;
use thiserror::Error;

/// Pixels at or above this value are not counted as dark.
const DARK_PIXEL_CEILING: u8 = 32;
/// A frame is dark when more than this fraction of its pixels are dark.
pub const DARK_FRAME_FRACTION: f32 = 0.95;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("{format:?} buffer too short: expected {expected} bytes, got {actual}")]
    InvalidLength {
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },
}

impl Classified for FrameError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Transient
    }
}

/// Pixel layouts the camera layer can turn into 8-bit grayscale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 4:2:2, two bytes per pixel; luma is every even byte.
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
}

impl PixelFormat {
    /// Map a V4L2 fourcc code to a supported format.
    pub fn from_fourcc(code: &[u8; 4]) -> Option<Self> {
        match code {
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"GREY" => Some(PixelFormat::Grey),
            b"Y16 " | b"Y16\0" => Some(PixelFormat::Y16),
            _ => None,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Grey => 1,
            PixelFormat::Yuyv | PixelFormat::Y16 => 2,
        }
    }

    /// Convert one raw buffer of `width * height` pixels to 8-bit grayscale.
    pub fn to_grayscale(self, buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
        let pixels = width as usize * height as usize;
        let expected = pixels * self.bytes_per_pixel();
        if buf.len() < expected {
            return Err(FrameError::InvalidLength {
                format: self,
                expected,
                actual: buf.len(),
            });
        }

        let raw = &buf[..expected];
        Ok(match self {
            PixelFormat::Grey => raw.to_vec(),
            PixelFormat::Yuyv => raw.iter().step_by(2).copied().collect(),
            // High byte of each little-endian sample.
            PixelFormat::Y16 => raw.chunks_exact(2).map(|px| px[1]).collect(),
        })
    }
}

/// A captured 8-bit grayscale camera frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Row-major pixels, `width * height` bytes.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        let is_dark = is_dark_frame(&data, DARK_FRAME_FRACTION);
        Self {
            data,
            width,
            height,
            captured_at: Instant::now(),
            sequence,
            is_dark,
        }
    }

    /// Borrow the pixels in the form the recognition pipeline consumes.
    pub fn as_frame_ref(&self) -> FrameRef<'_> {
        FrameRef::new(&self.data, self.width, self.height)
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }
}

/// True when more than `fraction` of the pixels are darker than 32.
pub fn is_dark_frame(gray: &[u8], fraction: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark = gray.iter().filter(|&&p| p < DARK_PIXEL_CEILING).count();
    (dark as f32 / gray.len() as f32) > fraction
}
