//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes the grayscale frame to the model input, decodes the three
//! anchor-free stride levels, applies IoU suppression and returns integer
//! regions clamped to the frame. Landmark outputs, when present, are ignored.

use crate::error::{Classified, ErrorClass};
use crate::sample::resize_bilinear;
use crate::types::{FrameRef, Region};
use crate::vision::FaceDetector;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_SCORE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0} — download det_10g.onnx from insightface")]
    ModelNotFound(String),
    #[error("unsupported detector model: {0}")]
    UnsupportedModel(String),
    #[error("frame buffer holds {actual} bytes, expected {expected}")]
    InvalidFrame { expected: usize, actual: usize },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl Classified for DetectorError {
    fn class(&self) -> ErrorClass {
        match self {
            DetectorError::ModelNotFound(_) | DetectorError::UnsupportedModel(_) => {
                ErrorClass::Configuration
            }
            DetectorError::InvalidFrame { .. }
            | DetectorError::InferenceFailed(_)
            | DetectorError::Ort(_) => ErrorClass::Transient,
        }
    }
}

/// Letterbox mapping from model input space back to frame space.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: usize, height: usize, target: usize) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: (target as f32 - new_w) / 2.0,
            pad_y: (target as f32 - new_h) / 2.0,
        }
    }

    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Model-space box before conversion to a frame [`Region`].
#[derive(Debug, Clone, Copy)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

/// (score, bbox) output tensor indices for one stride.
type StrideOutputs = (usize, usize);

pub struct ScrfdDetector {
    session: Session,
    stride_outputs: [StrideOutputs; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if output_names.len() < 6 {
            return Err(DetectorError::UnsupportedModel(format!(
                "SCRFD needs at least 6 outputs (3 strides × score/bbox), got {}",
                output_names.len()
            )));
        }
        let stride_outputs = discover_outputs(&output_names);

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            ?stride_outputs,
            "loaded SCRFD model"
        );

        Ok(Self { session, stride_outputs })
    }

    fn run(&mut self, frame: &FrameRef<'_>) -> Result<Vec<Candidate>, DetectorError> {
        let (input, letterbox) = preprocess(frame);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, &(score_idx, bbox_idx)) in SCRFD_STRIDES.iter().zip(self.stride_outputs.iter()) {
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            candidates.extend(decode_stride(scores, bboxes, stride, &letterbox));
        }
        Ok(candidates)
    }
}

impl FaceDetector for ScrfdDetector {
    fn detect(&mut self, frame: &FrameRef<'_>) -> Result<Vec<Region>, DetectorError> {
        let expected = frame.width as usize * frame.height as usize;
        if frame.width == 0 || frame.height == 0 || frame.data.len() < expected {
            return Err(DetectorError::InvalidFrame {
                expected,
                actual: frame.data.len(),
            });
        }

        let candidates = suppress(self.run(frame)?, SCRFD_NMS_THRESHOLD);
        let regions: Vec<Region> = candidates
            .iter()
            .filter_map(|c| to_region(c, frame.width, frame.height))
            .collect();
        tracing::debug!(faces = regions.len(), "SCRFD detections");
        Ok(regions)
    }
}

/// Letterbox a grayscale frame into a normalized 1x3x640x640 tensor.
fn preprocess(frame: &FrameRef<'_>) -> (Array4<f32>, Letterbox) {
    let (width, height) = (frame.width as usize, frame.height as usize);
    let letterbox = Letterbox::fit(width, height, SCRFD_INPUT_SIZE);
    let new_w = ((width as f32 * letterbox.scale).round() as usize).clamp(1, SCRFD_INPUT_SIZE);
    let new_h = ((height as f32 * letterbox.scale).round() as usize).clamp(1, SCRFD_INPUT_SIZE);
    let resized = resize_bilinear(frame.data, frame.width, frame.height, new_w as u32, new_h as u32);

    let pad_x = letterbox.pad_x.floor() as usize;
    let pad_y = letterbox.pad_y.floor() as usize;
    // Padding uses the mean so it normalizes to zero.
    let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
    for y in 0..SCRFD_INPUT_SIZE {
        for x in 0..SCRFD_INPUT_SIZE {
            let inside = (pad_y..pad_y + new_h).contains(&y) && (pad_x..pad_x + new_w).contains(&x);
            let pixel = if inside {
                resized[(y - pad_y) * new_w + (x - pad_x)] as f32
            } else {
                SCRFD_MEAN
            };
            let normalized = (pixel - SCRFD_MEAN) / SCRFD_STD;
            for channel in 0..3 {
                tensor[[0, channel, y, x]] = normalized;
            }
        }
    }
    (tensor, letterbox)
}

/// Map stride levels to (score, bbox) output indices.
///
/// Exports that name their tensors `score_8`, `bbox_8`, ... are mapped by
/// name; otherwise the standard order is assumed: scores for strides 8/16/32
/// first, then boxes.
fn discover_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| names.iter().position(|n| *n == format!("{prefix}_{stride}"));

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?)))
        .collect();

    match named {
        Some(found) => [found[0], found[1], found[2]],
        None => [(0, 3), (1, 4), (2, 5)],
    }
}

/// Decode the candidates above the score threshold for one stride level.
fn decode_stride(scores: &[f32], bboxes: &[f32], stride: usize, letterbox: &Letterbox) -> Vec<Candidate> {
    let grid = SCRFD_INPUT_SIZE / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    (0..anchors)
        .filter_map(|idx| {
            let score = scores.get(idx).copied()?;
            if score <= SCRFD_SCORE_THRESHOLD {
                return None;
            }
            let offsets = bboxes.get(idx * 4..idx * 4 + 4)?;

            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let anchor_x = (cell % grid) as f32 * s;
            let anchor_y = (cell / grid) as f32 * s;

            let (x1, y1) = letterbox.to_frame(anchor_x - offsets[0] * s, anchor_y - offsets[1] * s);
            let (x2, y2) = letterbox.to_frame(anchor_x + offsets[2] * s, anchor_y + offsets[3] * s);
            Some(Candidate { x1, y1, x2, y2, score })
        })
        .collect()
}

/// Greedy IoU suppression, highest score first.
fn suppress(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if keep.iter().all(|kept| iou(kept, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let inter_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let inter_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = inter_w * inter_h;
    let union = (a.x2 - a.x1) * (a.y2 - a.y1) + (b.x2 - b.x1) * (b.y2 - b.y1) - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// Round a candidate to pixel coordinates, clamped to the frame.
fn to_region(c: &Candidate, width: u32, height: u32) -> Option<Region> {
    let x1 = c.x1.round().clamp(0.0, width as f32) as i32;
    let y1 = c.y1.round().clamp(0.0, height as f32) as i32;
    let x2 = c.x2.round().clamp(0.0, width as f32) as i32;
    let y2 = c.y2.round().clamp(0.0, height as f32) as i32;
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Region::new(x1, y1, (x2 - x1) as u32, (y2 - y1) as u32).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(x: f32, y: f32, w: f32, h: f32, score: f32) -> Candidate {
        Candidate { x1: x, y1: y, x2: x + w, y2: y + h, score }
    }

    #[test]
    fn test_iou_partial() {
        let a = candidate(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = candidate(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(iou(&a, &candidate(20.0, 20.0, 5.0, 5.0, 1.0)), 0.0);
    }

    #[test]
    fn test_suppress_keeps_highest_score() {
        let kept = suppress(
            vec![
                candidate(5.0, 5.0, 100.0, 100.0, 0.8),
                candidate(0.0, 0.0, 100.0, 100.0, 0.9),
                candidate(200.0, 200.0, 50.0, 50.0, 0.7),
            ],
            SCRFD_NMS_THRESHOLD,
        );
        let scores: Vec<f32> = kept.iter().map(|c| c.score).collect();
        assert_eq!(scores, vec![0.9, 0.7]);
    }

    #[test]
    fn test_letterbox_maps_back_to_frame() {
        let lb = Letterbox::fit(320, 240, SCRFD_INPUT_SIZE);
        assert_eq!(lb.scale, 2.0);
        assert_eq!((lb.pad_x, lb.pad_y), (0.0, 80.0));
        let (x, y) = lb.to_frame(100.0 * 2.0, 50.0 * 2.0 + 80.0);
        assert!((x - 100.0).abs() < 1e-4 && (y - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_decode_stride_single_anchor() {
        let lb = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let grid = SCRFD_INPUT_SIZE / 32;
        let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.1f32; anchors];
        let mut bboxes = vec![0.0f32; anchors * 4];
        // Cell (x=2, y=1), first anchor.
        let idx = (grid + 2) * SCRFD_ANCHORS_PER_CELL;
        scores[idx] = 0.95;
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 2.0, 2.0]);

        let decoded = decode_stride(&scores, &bboxes, 32, &lb);
        assert_eq!(decoded.len(), 1);
        let c = decoded[0];
        assert_eq!((c.x1, c.y1, c.x2, c.y2), (32.0, 0.0, 128.0, 96.0));
    }

    #[test]
    fn test_discover_outputs_named_and_positional() {
        let named: Vec<String> = ["bbox_8", "score_8", "bbox_16", "score_16", "bbox_32", "score_32"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(discover_outputs(&named), [(1, 0), (3, 2), (5, 4)]);

        let numeric: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(discover_outputs(&numeric), [(0, 3), (1, 4), (2, 5)]);
    }

    #[test]
    fn test_to_region_clamps_and_rejects_empty() {
        let r = to_region(&candidate(-10.0, 5.4, 120.0, 100.0, 0.9), 100, 80).unwrap();
        assert_eq!((r.x(), r.y(), r.width(), r.height()), (0, 5, 100, 75));
        assert!(to_region(&candidate(150.0, 10.0, 20.0, 20.0, 0.9), 100, 80).is_none());
    }
}
