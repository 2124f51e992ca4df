//! Face detection capability and its backends.
//!
//! Two interchangeable backends exist: SCRFD via ONNX Runtime (accurate) and the
//! SeetaFace cascade via `rustface` (fast fallback, see [`crate::seeta`]). The rest
//! of the system only sees [`FaceDetector`].

use crate::types::Detection;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("no detector backend available (tried: {0})")]
    NoBackendAvailable(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Capability: find faces in a pixel buffer.
pub trait FaceDetector: Send {
    /// Short backend name for logs and status output.
    fn backend(&self) -> &'static str;

    /// Detect faces, in `frame` pixel coordinates.
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, DetectorError>;
}

/// Model locations probed at startup.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub scrfd_model: PathBuf,
    pub seeta_model: PathBuf,
    pub intra_threads: usize,
}

/// Pick the best available backend: SCRFD first, SeetaFace second.
pub fn probe_detector(config: &DetectorConfig) -> Result<Box<dyn FaceDetector>, DetectorError> {
    let mut tried = Vec::new();

    match ScrfdDetector::load(&config.scrfd_model, config.intra_threads) {
        Ok(d) => {
            tracing::info!(
                backend = d.backend(),
                path = %config.scrfd_model.display(),
                "face detector selected"
            );
            return Ok(Box::new(d));
        }
        Err(e) => {
            tracing::warn!(error = %e, "SCRFD backend unavailable; trying fallback");
            tried.push(format!("scrfd: {e}"));
        }
    }

    match crate::seeta::SeetaDetector::load(&config.seeta_model) {
        Ok(d) => {
            tracing::info!(
                backend = d.backend(),
                path = %config.seeta_model.display(),
                "face detector selected"
            );
            return Ok(Box::new(d));
        }
        Err(e) => {
            tracing::warn!(error = %e, "SeetaFace backend unavailable");
            tried.push(format!("seeta: {e}"));
        }
    }

    Err(DetectorError::NoBackendAvailable(tried.join("; ")))
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx).
type StrideOutputIndices = (usize, usize);

/// SCRFD-based face detector.
pub struct ScrfdDetector {
    session: Session,
    /// Per-stride output indices for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl ScrfdDetector {
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        // score + bbox per stride; keypoint outputs may follow and are ignored.
        if output_names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires at least 6 outputs (3 strides × score/bbox), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self { session, stride_indices })
    }

    /// Letterbox an RGB frame into a normalized 1×3×640×640 tensor.
    fn preprocess(frame: &RgbImage) -> (Array4<f32>, LetterboxInfo) {
        let (width, height) = (frame.width() as f32, frame.height() as f32);
        let scale = (SCRFD_INPUT_SIZE as f32 / width).min(SCRFD_INPUT_SIZE as f32 / height);

        let new_w = ((width * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
        let new_h = ((height * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
        let pad_x = (SCRFD_INPUT_SIZE as u32 - new_w) / 2;
        let pad_y = (SCRFD_INPUT_SIZE as u32 - new_h) / 2;

        let resized = imageops::resize(frame, new_w, new_h, FilterType::Triangle);

        // Padding stays at 0.0, which is SCRFD_MEAN after normalization.
        let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let ty = (y + pad_y) as usize;
            let tx = (x + pad_x) as usize;
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = (pixel.0[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
            }
        }

        let letterbox = LetterboxInfo {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        };
        (tensor, letterbox)
    }
}

impl FaceDetector for ScrfdDetector {
    fn backend(&self) -> &'static str {
        "scrfd"
    }

    /// Detections sorted by descending confidence.
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        let (input, letterbox) = Self::preprocess(frame);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();
        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| {
                    DetectorError::InferenceFailed(format!("scores stride {stride}: {e}"))
                })?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| {
                    DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}"))
                })?;

            all_detections.extend(decode_stride(
                scores,
                bboxes,
                stride,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        Ok(nms(all_detections, SCRFD_NMS_THRESHOLD))
    }
}

/// Map output tensors to stride slots.
///
/// Exports either name their outputs ("score_8", "bbox_16", ...) or use generic
/// numeric names, in which case the standard order is [0-2] scores, [3-5] bboxes.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?)))
        .collect();

    match named {
        Some(indices) => [indices[0], indices[1], indices[2]],
        None => {
            tracing::info!(?names, "SCRFD output names not recognized, using positional mapping");
            [(0, 3), (1, 4), (2, 5)]
        }
    }
}

/// Decode detections for a single stride level into original-frame space.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<Detection> {
    let grid = SCRFD_INPUT_SIZE / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    let unletterbox_x = |v: f32| (v - letterbox.pad_x) / letterbox.scale;
    let unletterbox_y = |v: f32| (v - letterbox.pad_y) / letterbox.scale;

    (0..num_anchors)
        .filter_map(|idx| {
            let score = scores.get(idx).copied()?;
            if score <= threshold {
                return None;
            }
            let offsets = bboxes.get(idx * 4..idx * 4 + 4)?;

            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let anchor_x = (cell % grid) as f32 * s;
            let anchor_y = (cell / grid) as f32 * s;

            let x1 = unletterbox_x(anchor_x - offsets[0] * s);
            let y1 = unletterbox_y(anchor_y - offsets[1] * s);
            let x2 = unletterbox_x(anchor_x + offsets[2] * s);
            let y2 = unletterbox_y(anchor_y + offsets[3] * s);

            Some(Detection {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
            })
        })
        .collect()
}

/// Non-maximum suppression. Output is sorted by descending confidence.
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Detection> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

/// Intersection-over-union of two detections.
fn iou(a: &Detection, b: &Detection) -> f32 {
    let inter_w = (a.right().min(b.right()) - a.x.max(b.x)).max(0.0);
    let inter_h = (a.bottom().min(b.bottom()) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 { inter / union } else { 0.0 }
}
