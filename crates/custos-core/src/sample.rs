//! Face samples — cropping, intensity statistics, normalization, fingerprints.
//!
//! A raw crop of a detected region feeds the quality gate. The normalized
//! sample (fixed size, bilinear resize, CLAHE equalization) feeds training,
//! inference and the recognition cache.

use crate::error::{Classified, ErrorClass};
use crate::types::{FrameRef, Region};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Side length of a normalized sample in pixels.
pub const NORMALIZED_SIZE: u32 = 100;
/// CLAHE tile grid (per axis) applied during normalization.
const CLAHE_TILES: u32 = 8;
/// CLAHE clip limit as a multiple of the mean histogram bin height.
const CLAHE_CLIP_LIMIT: f32 = 2.0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SampleError {
    #[error("sample buffer holds {actual} bytes, expected {expected}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("sample has empty dimensions: {width}x{height}")]
    EmptyDimensions { width: u32, height: u32 },
    #[error("region {region:?} lies outside the {width}x{height} frame")]
    OutsideFrame { region: Region, width: u32, height: u32 },
}

impl Classified for SampleError {
    fn class(&self) -> ErrorClass {
        match self {
            // A short frame buffer is a camera/decoder glitch, not a caller bug.
            SampleError::InvalidLength { .. } => ErrorClass::Transient,
            SampleError::EmptyDimensions { .. } | SampleError::OutsideFrame { .. } => {
                ErrorClass::Configuration
            }
        }
    }
}

/// SHA-256 of a sample's pixel bytes; the recognition cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// 8-bit grayscale face image, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceSample {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
}

impl FaceSample {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self, SampleError> {
        if width == 0 || height == 0 {
            return Err(SampleError::EmptyDimensions { width, height });
        }
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(SampleError::InvalidLength {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self { pixels, width, height })
    }

    /// Copy the part of `region` that lies inside the frame.
    pub fn crop(frame: &FrameRef<'_>, region: &Region) -> Result<Self, SampleError> {
        let fw = frame.width as i64;
        let fh = frame.height as i64;
        let expected = (fw * fh) as usize;
        if frame.data.len() < expected {
            return Err(SampleError::InvalidLength {
                expected,
                actual: frame.data.len(),
            });
        }

        let x0 = (region.x() as i64).clamp(0, fw);
        let y0 = (region.y() as i64).clamp(0, fh);
        let x1 = region.right().clamp(0, fw);
        let y1 = region.bottom().clamp(0, fh);
        if x1 <= x0 || y1 <= y0 {
            return Err(SampleError::OutsideFrame {
                region: *region,
                width: frame.width,
                height: frame.height,
            });
        }

        let w = (x1 - x0) as usize;
        let h = (y1 - y0) as usize;
        let mut pixels = Vec::with_capacity(w * h);
        for row in y0 as usize..y1 as usize {
            let start = row * fw as usize + x0 as usize;
            pixels.extend_from_slice(&frame.data[start..start + w]);
        }

        Self::new(pixels, w as u32, h as u32)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    /// Mean pixel intensity (0.0–255.0).
    pub fn mean(&self) -> f32 {
        let sum: u64 = self.pixels.iter().map(|&p| p as u64).sum();
        sum as f32 / self.pixels.len() as f32
    }

    /// Population standard deviation of pixel intensity.
    pub fn std_dev(&self) -> f32 {
        let mean = self.mean() as f64;
        let variance = self
            .pixels
            .iter()
            .map(|&p| (p as f64 - mean).powi(2))
            .sum::<f64>()
            / self.pixels.len() as f64;
        variance.sqrt() as f32
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.pixels)
    }

    /// Resize to `size` x `size` and equalize contrast.
    ///
    /// Training and inference must see samples produced by this same path.
    pub fn normalized(&self, size: u32) -> FaceSample {
        let mut pixels = resize_bilinear(&self.pixels, self.width, self.height, size, size);
        clahe_enhance(&mut pixels, size, size, CLAHE_TILES, CLAHE_CLIP_LIMIT);
        FaceSample {
            pixels,
            width: size,
            height: size,
        }
    }
}

/// Bilinear resize of a grayscale buffer using pixel-center alignment.
pub fn resize_bilinear(src: &[u8], width: u32, height: u32, new_w: u32, new_h: u32) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let (new_w, new_h) = (new_w as usize, new_h as usize);
    let scale_x = w as f32 / new_w as f32;
    let scale_y = h as f32 / new_h as f32;

    let mut out = vec![0u8; new_w * new_h];
    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, h as i32 - 1) as usize;
        let y1 = (y0 + 1).min(h - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, w as i32 - 1) as usize;
            let x1 = (x0 + 1).min(w - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            let tl = src[y0 * w + x0] as f32;
            let tr = src[y0 * w + x1] as f32;
            let bl = src[y1 * w + x0] as f32;
            let br = src[y1 * w + x1] as f32;

            let val = tl * (1.0 - fx) * (1.0 - fy)
                + tr * fx * (1.0 - fy)
                + bl * (1.0 - fx) * fy
                + br * fx * fy;
            out[y * new_w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Contrast-Limited Adaptive Histogram Equalization, in place.
///
/// `clip_limit` is expressed as a multiple of the mean bin height of a tile
/// histogram (so 2.0 allows each bin twice its fair share before clipping).
/// Pixels are mapped by bilinear interpolation between neighbouring tile CDFs.
pub fn clahe_enhance(gray: &mut [u8], width: u32, height: u32, tiles: u32, clip_limit: f32) {
    let w = width as usize;
    let h = height as usize;
    let t = tiles as usize;
    if w == 0 || h == 0 || t == 0 || gray.len() < w * h {
        return;
    }
    let tile_w = w / t;
    let tile_h = h / t;
    if tile_w == 0 || tile_h == 0 {
        return;
    }
    let tile_pixels = tile_w * tile_h;
    let clip = ((clip_limit * tile_pixels as f32 / 256.0) as u32).max(1);

    let mut cdfs: Vec<[f32; 256]> = Vec::with_capacity(t * t);
    for row in 0..t {
        for col in 0..t {
            let mut hist = [0u32; 256];
            for y in row * tile_h..(row + 1) * tile_h {
                for x in col * tile_w..(col + 1) * tile_w {
                    hist[gray[y * w + x] as usize] += 1;
                }
            }

            let mut excess = 0u32;
            for bin in hist.iter_mut() {
                if *bin > clip {
                    excess += *bin - clip;
                    *bin = clip;
                }
            }
            let redist = excess / 256;
            let leftover = (excess % 256) as usize;
            for (i, bin) in hist.iter_mut().enumerate() {
                *bin += redist + u32::from(i < leftover);
            }

            let mut cdf = [0f32; 256];
            let mut running = 0f32;
            for (slot, &count) in cdf.iter_mut().zip(hist.iter()) {
                running += count as f32;
                *slot = running;
            }
            let cdf_min = cdf.iter().copied().find(|&v| v > 0.0).unwrap_or(0.0);
            let denom = tile_pixels as f32 - cdf_min;
            if denom > 0.0 {
                for v in cdf.iter_mut() {
                    *v = ((*v - cdf_min) / denom * 255.0).clamp(0.0, 255.0);
                }
            }
            cdfs.push(cdf);
        }
    }

    let last = (t - 1) as f32;
    for y in 0..h {
        let fy = (y as f32 / tile_h as f32 - 0.5).clamp(0.0, last);
        let r0 = fy as usize;
        let r1 = (r0 + 1).min(t - 1);
        let dy = fy - r0 as f32;

        for x in 0..w {
            let fx = (x as f32 / tile_w as f32 - 0.5).clamp(0.0, last);
            let c0 = fx as usize;
            let c1 = (c0 + 1).min(t - 1);
            let dx = fx - c0 as f32;

            let pixel = gray[y * w + x] as usize;
            let top = cdfs[r0 * t + c0][pixel] * (1.0 - dx) + cdfs[r0 * t + c1][pixel] * dx;
            let bot = cdfs[r1 * t + c0][pixel] * (1.0 - dx) + cdfs[r1 * t + c1][pixel] * dx;
            gray[y * w + x] = (top * (1.0 - dy) + bot * dy).round().clamp(0.0, 255.0) as u8;
        }
    }
}
