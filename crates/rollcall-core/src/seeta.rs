//! SeetaFace frontal cascade via `rustface` — the fast fallback detector.

use crate::detector::{DetectorError, FaceDetector};
use crate::types::Detection;
use image::{DynamicImage, RgbImage};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

const MIN_FACE_SIZE: u32 = 20;
const SCORE_THRESHOLD: f64 = 2.0;
const PYRAMID_SCALE_FACTOR: f32 = 0.8;
const WINDOW_STEP: u32 = 4;

/// Face detector backed by the SeetaFace engine. Works on the grayscale plane.
pub struct SeetaDetector {
    model: rustface::Model,
}

impl SeetaDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        let file = File::open(model_path)
            .map_err(|_| DetectorError::ModelNotFound(model_path.display().to_string()))?;
        let model = rustface::read_model(BufReader::new(file)).map_err(|e| {
            DetectorError::InferenceFailed(format!(
                "invalid SeetaFace model {}: {e}",
                model_path.display()
            ))
        })?;
        tracing::info!(path = %model_path.display(), "loaded SeetaFace model");
        Ok(Self { model })
    }
}

impl FaceDetector for SeetaDetector {
    fn backend(&self) -> &'static str {
        "seetaface"
    }

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        // The rustface detector is not Send, so one is built per call from the shared model.
        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(MIN_FACE_SIZE);
        detector.set_score_thresh(SCORE_THRESHOLD);
        detector.set_pyramid_scale_factor(PYRAMID_SCALE_FACTOR);
        detector.set_slide_window_step(WINDOW_STEP, WINDOW_STEP);

        let gray = DynamicImage::ImageRgb8(frame.clone()).to_luma8();
        let image = rustface::ImageData::new(gray.as_raw(), gray.width(), gray.height());
        let faces = detector.detect(&image);

        Ok(faces
            .iter()
            .map(|face| {
                let bbox = face.bbox();
                Detection {
                    x: bbox.x() as f32,
                    y: bbox.y() as f32,
                    width: bbox.width() as f32,
                    height: bbox.height() as f32,
                    confidence: face.score() as f32,
                }
            })
            .collect())
    }
}
