//! Local Binary Pattern Histogram face classifier.
//!
//! Each sample is lightly blurred, converted to a circular LBP code image,
//! and summarized as a grid of per-cell normalized histograms. Prediction is
//! nearest neighbour under the chi-square distance; anything at or beyond
//! the distance threshold comes back as [`UNKNOWN_LABEL`].

use crate::sample::FaceSample;
use crate::types::UNKNOWN_LABEL;
use crate::vision::{check_training_set, Classifier, ClassifierError};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::path::Path;

const LBP_EPSILON: f32 = f32::EPSILON;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LbphParams {
    /// Radius of the sampling circle around each pixel.
    pub radius: u32,
    /// Points sampled on the circle; histograms have `2^neighbors` bins.
    pub neighbors: u32,
    pub grid_x: u32,
    pub grid_y: u32,
    /// Distances at or above this value yield `UNKNOWN_LABEL`.
    pub threshold: f32,
}

impl Default for LbphParams {
    fn default() -> Self {
        Self {
            radius: 1,
            neighbors: 8,
            grid_x: 8,
            grid_y: 8,
            threshold: 100.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LabelledHistogram {
    label: i64,
    histogram: Vec<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LbphClassifier {
    params: LbphParams,
    histograms: Vec<LabelledHistogram>,
}

impl LbphClassifier {
    pub fn new(params: LbphParams) -> Self {
        Self {
            params,
            histograms: Vec::new(),
        }
    }

    pub fn params(&self) -> &LbphParams {
        &self.params
    }

    /// Number of training samples held by the model.
    pub fn sample_count(&self) -> usize {
        self.histograms.len()
    }

    /// Load a model previously written by [`save`](Self::save).
    pub fn load(path: &Path) -> Result<Self, ClassifierError> {
        let model_file = |reason: String| ClassifierError::ModelFile {
            path: path.display().to_string(),
            reason,
        };
        if !path.exists() {
            return Err(model_file("not found — run `custos train` first".into()));
        }
        let raw = std::fs::read_to_string(path).map_err(|e| model_file(e.to_string()))?;
        let model: Self = serde_json::from_str(&raw).map_err(|e| model_file(e.to_string()))?;
        tracing::info!(
            path = %path.display(),
            samples = model.histograms.len(),
            "loaded LBPH model"
        );
        Ok(model)
    }

    pub fn save(&self, path: &Path) -> Result<(), ClassifierError> {
        let model_file = |reason: String| ClassifierError::ModelFile {
            path: path.display().to_string(),
            reason,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| model_file(e.to_string()))?;
        }
        let json = serde_json::to_string(self).map_err(|e| model_file(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| model_file(e.to_string()))?;
        tracing::info!(path = %path.display(), samples = self.histograms.len(), "saved LBPH model");
        Ok(())
    }

    fn describe(&self, sample: &FaceSample) -> Result<Vec<f32>, ClassifierError> {
        let p = &self.params;
        let (w, h) = (sample.width(), sample.height());
        let too_small = ClassifierError::SampleTooSmall { width: w, height: h };
        if w <= 2 * p.radius || h <= 2 * p.radius {
            return Err(too_small);
        }
        let (lbp_w, lbp_h) = (w - 2 * p.radius, h - 2 * p.radius);
        if lbp_w < p.grid_x || lbp_h < p.grid_y {
            return Err(too_small);
        }

        let blurred = gaussian_blur3(sample.pixels(), w as usize, h as usize);
        let codes = lbp_codes(&blurred, w as usize, h as usize, p.radius, p.neighbors);
        Ok(spatial_histogram(
            &codes,
            lbp_w as usize,
            lbp_h as usize,
            1usize << p.neighbors,
            p.grid_x as usize,
            p.grid_y as usize,
        ))
    }
}

impl Classifier for LbphClassifier {
    fn train(&mut self, samples: &[FaceSample], labels: &[i64]) -> Result<(), ClassifierError> {
        check_training_set(samples, labels)?;
        let histograms = samples
            .iter()
            .zip(labels)
            .map(|(sample, &label)| {
                self.describe(sample)
                    .map(|histogram| LabelledHistogram { label, histogram })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.histograms = histograms;
        Ok(())
    }

    fn classify(&self, sample: &FaceSample) -> Result<(i64, f32), ClassifierError> {
        if self.histograms.is_empty() {
            return Err(ClassifierError::NotTrained);
        }
        let query = self.describe(sample)?;

        let mut best_label = UNKNOWN_LABEL;
        let mut best_distance = f32::INFINITY;
        for trained in &self.histograms {
            let distance = chi_square(&trained.histogram, &query);
            if distance < best_distance {
                best_distance = distance;
                best_label = trained.label;
            }
        }

        if best_distance < self.params.threshold {
            Ok((best_label, best_distance))
        } else {
            Ok((UNKNOWN_LABEL, best_distance))
        }
    }

    fn is_trained(&self) -> bool {
        !self.histograms.is_empty()
    }
}

/// 3x3 Gaussian blur ([1 2 1] separable), replicating edge pixels.
fn gaussian_blur3(src: &[u8], w: usize, h: usize) -> Vec<u8> {
    let at = |x: isize, y: isize| -> u32 {
        let x = x.clamp(0, w as isize - 1) as usize;
        let y = y.clamp(0, h as isize - 1) as usize;
        src[y * w + x] as u32
    };

    let mut horizontal = vec![0u32; w * h];
    for y in 0..h as isize {
        for x in 0..w as isize {
            horizontal[y as usize * w + x as usize] = at(x - 1, y) + 2 * at(x, y) + at(x + 1, y);
        }
    }

    let mut out = vec![0u8; w * h];
    for y in 0..h {
        for x in 0..w {
            let up = horizontal[y.saturating_sub(1) * w + x];
            let mid = horizontal[y * w + x];
            let down = horizontal[(y + 1).min(h - 1) * w + x];
            // Weights sum to 16; add 8 to round.
            out[y * w + x] = ((up + 2 * mid + down + 8) / 16) as u8;
        }
    }
    out
}

/// Circular LBP codes with bilinear interpolation of the sample points.
///
/// Output is `(w - 2r) x (h - 2r)`, skipping the border where the circle
/// would leave the image.
fn lbp_codes(src: &[u8], w: usize, h: usize, radius: u32, neighbors: u32) -> Vec<u32> {
    let r = radius as usize;
    let (out_w, out_h) = (w - 2 * r, h - 2 * r);
    let mut codes = vec![0u32; out_w * out_h];
    let px = |x: usize, y: usize| src[y * w + x] as f32;

    for n in 0..neighbors {
        let angle = 2.0 * PI * n as f32 / neighbors as f32;
        let sx = radius as f32 * angle.cos();
        let sy = -(radius as f32) * angle.sin();
        let (fx, fy) = (sx.floor(), sy.floor());
        let (cx, cy) = (sx.ceil(), sy.ceil());
        let (tx, ty) = (sx - fx, sy - fy);
        let w1 = (1.0 - tx) * (1.0 - ty);
        let w2 = tx * (1.0 - ty);
        let w3 = (1.0 - tx) * ty;
        let w4 = tx * ty;
        let (fx, fy, cx, cy) = (fx as isize, fy as isize, cx as isize, cy as isize);

        for y in r..h - r {
            for x in r..w - r {
                let at = |dx: isize, dy: isize| px((x as isize + dx) as usize, (y as isize + dy) as usize);
                let t = w1 * at(fx, fy) + w2 * at(cx, fy) + w3 * at(fx, cy) + w4 * at(cx, cy);
                let center = px(x, y);
                if t > center || (t - center).abs() < LBP_EPSILON {
                    codes[(y - r) * out_w + (x - r)] |= 1 << n;
                }
            }
        }
    }
    codes
}

/// Concatenated per-cell histograms, each normalized by its cell's pixel count.
fn spatial_histogram(
    codes: &[u32],
    w: usize,
    h: usize,
    bins: usize,
    grid_x: usize,
    grid_y: usize,
) -> Vec<f32> {
    let cell_w = w / grid_x;
    let cell_h = h / grid_y;
    let cell_total = (cell_w * cell_h) as f32;
    let mut histogram = vec![0f32; grid_x * grid_y * bins];

    for gy in 0..grid_y {
        for gx in 0..grid_x {
            let offset = (gy * grid_x + gx) * bins;
            for y in gy * cell_h..(gy + 1) * cell_h {
                for x in gx * cell_w..(gx + 1) * cell_w {
                    histogram[offset + codes[y * w + x] as usize] += 1.0;
                }
            }
            for bin in &mut histogram[offset..offset + bins] {
                *bin /= cell_total;
            }
        }
    }
    histogram
}

/// Alternative chi-square distance: `sum 2 (a - b)^2 / (a + b)`.
fn chi_square(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .filter(|(x, y)| (*x + *y).abs() > f32::EPSILON)
        .map(|(x, y)| 2.0 * (x - y).powi(2) / (x + y))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic pseudo-random texture.
    fn texture(seed: u32, size: u32) -> FaceSample {
        let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
        let pixels = (0..size * size)
            .map(|_| {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                (state >> 16) as u8
            })
            .collect();
        FaceSample::new(pixels, size, size).unwrap()
    }

    fn stripes(size: u32) -> FaceSample {
        let pixels = (0..size * size).map(|i| if (i % size) / 4 % 2 == 0 { 40 } else { 210 }).collect();
        FaceSample::new(pixels, size, size).unwrap()
    }

    #[test]
    fn test_chi_square_identical_is_zero() {
        let h = vec![0.25, 0.25, 0.5, 0.0];
        assert_eq!(chi_square(&h, &h), 0.0);
    }

    #[test]
    fn test_chi_square_disjoint() {
        // Disjoint unit mass: 2*1^2/1 + 2*1^2/1
        assert!((chi_square(&[1.0, 0.0], &[0.0, 1.0]) - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_lbp_dark_center_sets_all_bits() {
        let mut src = vec![200u8; 3 * 3];
        src[4] = 10;
        let codes = lbp_codes(&src, 3, 3, 1, 8);
        assert_eq!(codes, vec![0xFF]);

        let mut src = vec![10u8; 3 * 3];
        src[4] = 200;
        assert_eq!(lbp_codes(&src, 3, 3, 1, 8), vec![0]);
    }

    #[test]
    fn test_spatial_histogram_cells_normalized() {
        let codes = vec![3u32; 16 * 16];
        let hist = spatial_histogram(&codes, 16, 16, 256, 2, 2);
        assert_eq!(hist.len(), 4 * 256);
        for cell in hist.chunks(256) {
            assert!((cell.iter().sum::<f32>() - 1.0).abs() < 1e-6);
            assert_eq!(cell[3], 1.0);
        }
    }

    #[test]
    fn test_blur_keeps_uniform() {
        let flat = vec![77u8; 6 * 4];
        assert!(gaussian_blur3(&flat, 6, 4).iter().all(|&p| p == 77));
    }

    #[test]
    fn test_classify_nearest_label() {
        let mut model = LbphClassifier::default();
        let a = texture(1, 100);
        let b = stripes(100);
        model.train(&[a.clone(), b.clone()], &[1, 2]).unwrap();
        assert!(model.is_trained());
        assert_eq!(model.sample_count(), 2);

        let (label, distance) = model.classify(&a).unwrap();
        assert_eq!(label, 1);
        assert_eq!(distance, 0.0);
        assert_eq!(model.classify(&b).unwrap().0, 2);
    }

    #[test]
    fn test_beyond_threshold_is_unknown() {
        let mut model = LbphClassifier::new(LbphParams {
            threshold: 1.0,
            ..LbphParams::default()
        });
        model.train(&[stripes(100)], &[1]).unwrap();
        let (label, distance) = model.classify(&texture(3, 100)).unwrap();
        assert_eq!(label, UNKNOWN_LABEL);
        assert!(distance >= 1.0);
    }

    #[test]
    fn test_untrained_and_tiny_samples() {
        let model = LbphClassifier::default();
        assert!(matches!(model.classify(&stripes(100)), Err(ClassifierError::NotTrained)));

        let mut model = LbphClassifier::default();
        let tiny = FaceSample::new(vec![0; 9], 3, 3).unwrap();
        assert!(matches!(
            model.train(&[tiny], &[1]),
            Err(ClassifierError::SampleTooSmall { width: 3, height: 3 })
        ));
        assert!(!model.is_trained());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models/lbph.json");

        let mut model = LbphClassifier::default();
        model.train(&[texture(5, 100)], &[42]).unwrap();
        model.save(&path).unwrap();

        let loaded = LbphClassifier::load(&path).unwrap();
        assert_eq!(loaded.params(), model.params());
        assert_eq!(loaded.sample_count(), 1);
        let (label, distance) = loaded.classify(&texture(5, 100)).unwrap();
        assert_eq!(label, 42);
        assert!(distance < 1e-3, "distance {distance}");
    }

    #[test]
    fn test_load_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let err = LbphClassifier::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ClassifierError::ModelFile { .. }));
    }
}
