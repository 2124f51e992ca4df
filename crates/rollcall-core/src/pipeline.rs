//! Per-frame processing: detect → crop → batch embed → assign.

use crate::detector::{DetectorError, FaceDetector};
use crate::embedder::{EmbedderError, FaceEmbedder};
use crate::frame::Frame;
use crate::geometry::{self, crop_face, padded_crop_region};
use crate::matcher;
use crate::roster::Session;
use crate::types::{BoundingBox, DetectedFace, FrameResult};
use std::time::Instant;
use thiserror::Error;

pub const DEFAULT_DETECTION_SCALE: f32 = 0.5;
pub const DEFAULT_CROP_PADDING: f32 = 0.15;
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.70;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedder error: {0}")]
    Embedder(#[from] EmbedderError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineOptions {
    /// Factor applied to the frame before detection, in (0, 1].
    pub detection_scale: f32,
    /// Fraction of box width/height added on each side before cropping.
    pub crop_padding: f32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            detection_scale: DEFAULT_DETECTION_SCALE,
            crop_padding: DEFAULT_CROP_PADDING,
        }
    }
}

/// Detection and embedding glue around the two backends.
pub struct FramePipeline {
    detector: Box<dyn FaceDetector>,
    embedder: Box<dyn FaceEmbedder>,
    options: PipelineOptions,
}

impl FramePipeline {
    pub fn new(
        detector: Box<dyn FaceDetector>,
        embedder: Box<dyn FaceEmbedder>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            detector,
            embedder,
            options,
        }
    }

    pub fn detector_backend(&self) -> &'static str {
        self.detector.backend()
    }

    pub fn embedder_backend(&self) -> &'static str {
        self.embedder.backend()
    }

    /// Detect on the downscaled frame and project boxes back to original pixels.
    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, PipelineError> {
        let scale = self.options.detection_scale;
        let small = geometry::downscale(frame.rgb(), scale);
        let detections = self.detector.detect(&small)?;
        Ok(detections.iter().map(|d| geometry::rescale(d, scale)).collect())
    }

    /// Detect every face and embed all valid crops in one batch.
    ///
    /// Faces whose padded crop is empty, or whose batch came back the wrong
    /// size, are returned without an embedding.
    pub fn analyze(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, PipelineError> {
        let boxes = self.detect(frame)?;
        let mut faces: Vec<DetectedFace> = boxes
            .into_iter()
            .enumerate()
            .map(|(box_index, bbox)| DetectedFace { box_index, bbox, embedding: None })
            .collect();
        if faces.is_empty() {
            return Ok(faces);
        }

        let size = self.embedder.input_size();
        let (indices, crops): (Vec<usize>, Vec<_>) = faces
            .iter()
            .filter_map(|face| {
                let region = padded_crop_region(
                    &face.bbox,
                    self.options.crop_padding,
                    frame.width(),
                    frame.height(),
                );
                if region.is_none() {
                    tracing::debug!(
                        face = face.box_index,
                        bbox = ?face.bbox,
                        "empty crop; face left unembedded"
                    );
                }
                region.map(|r| (face.box_index, crop_face(frame.rgb(), r, size)))
            })
            .unzip();

        if crops.is_empty() {
            return Ok(faces);
        }

        let embeddings = match self.embedder.embed_batch(&crops) {
            Ok(embeddings) if embeddings.len() == indices.len() => embeddings,
            Ok(embeddings) => {
                tracing::warn!(
                    submitted = indices.len(),
                    returned = embeddings.len(),
                    "embedding batch size mismatch"
                );
                return Ok(faces);
            }
            Err(EmbedderError::BatchMismatch { submitted, returned }) => {
                tracing::warn!(submitted, returned, "embedding batch size mismatch");
                return Ok(faces);
            }
            Err(e) => return Err(e.into()),
        };

        for (index, embedding) in indices.into_iter().zip(embeddings) {
            faces[index].embedding = Some(embedding);
        }
        Ok(faces)
    }
}

/// Full per-frame matcher: pipeline plus greedy roster assignment.
pub struct FrameMatcher {
    pipeline: FramePipeline,
    threshold: f32,
}

impl FrameMatcher {
    pub fn new(pipeline: FramePipeline, threshold: f32) -> Self {
        Self { pipeline, threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn pipeline_mut(&mut self) -> &mut FramePipeline {
        &mut self.pipeline
    }

    pub fn detector_backend(&self) -> &'static str {
        self.pipeline.detector_backend()
    }

    pub fn embedder_backend(&self) -> &'static str {
        self.pipeline.embedder_backend()
    }

    /// Match every face in `frame` against `session`.
    ///
    /// An inactive session short-circuits before detection runs.
    pub fn process_frame(
        &mut self,
        frame: &Frame,
        session: &Session,
    ) -> Result<FrameResult, PipelineError> {
        if !session.active {
            return Ok(FrameResult::no_session());
        }

        let started = Instant::now();
        let faces = self.pipeline.analyze(frame)?;
        if faces.is_empty() {
            return Ok(FrameResult::empty(elapsed_ms(started)));
        }

        let matches = matcher::assign(&faces, &session.identities, self.threshold);
        let result = FrameResult::from_matches(matches, elapsed_ms(started));
        tracing::debug!(
            faces = result.num_faces,
            matched = result.faces.iter().filter(|f| f.matched).count(),
            ms = result.processing_time_ms,
            "frame processed"
        );
        Ok(result)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
pub(crate) mod testing {
    //! Stub backends shared by unit tests.

    use super::*;
    use crate::types::{Detection, Embedding};
    use image::RgbImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Returns the same detections (in detector-input pixels) every call.
    pub struct FixedDetector {
        pub detections: Vec<Detection>,
        pub calls: Arc<AtomicUsize>,
    }

    impl FaceDetector for FixedDetector {
        fn backend(&self) -> &'static str {
            "fixed"
        }

        fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.detections.clone())
        }
    }

    /// Finds the bounding box of bright pixels.
    pub struct BrightRegionDetector;

    impl FaceDetector for BrightRegionDetector {
        fn backend(&self) -> &'static str {
            "bright-region"
        }

        fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
            let bright: Vec<(u32, u32)> = frame
                .enumerate_pixels()
                .filter(|(_, _, p)| p.0[0] >= 128)
                .map(|(x, y, _)| (x, y))
                .collect();
            if bright.is_empty() {
                return Ok(Vec::new());
            }
            let min_x = bright.iter().map(|p| p.0).min().unwrap_or(0) as f32;
            let max_x = bright.iter().map(|p| p.0).max().unwrap_or(0) as f32;
            let min_y = bright.iter().map(|p| p.1).min().unwrap_or(0) as f32;
            let max_y = bright.iter().map(|p| p.1).max().unwrap_or(0) as f32;
            Ok(vec![Detection {
                x: min_x,
                y: min_y,
                width: max_x + 1.0 - min_x,
                height: max_y + 1.0 - min_y,
                confidence: 1.0,
            }])
        }
    }

    /// Hands out scripted embeddings in order and records batch sizes.
    pub struct ScriptedEmbedder {
        pub embeddings: Vec<Embedding>,
        pub batches: Arc<Mutex<Vec<usize>>>,
        pub fail: bool,
    }

    impl FaceEmbedder for ScriptedEmbedder {
        fn backend(&self) -> &'static str {
            "scripted"
        }

        fn input_size(&self) -> u32 {
            16
        }

        fn embed_batch(&mut self, faces: &[RgbImage]) -> Result<Vec<Embedding>, EmbedderError> {
            self.batches.lock().unwrap().push(faces.len());
            if self.fail {
                return Err(EmbedderError::InferenceFailed("scripted failure".into()));
            }
            assert!(faces.iter().all(|f| f.dimensions() == (16, 16)));
            Ok(self.embeddings.iter().take(faces.len()).cloned().collect())
        }
    }

    pub fn embedding(head: &[f32]) -> Embedding {
        let mut values = head.to_vec();
        values.resize(8, 0.0);
        Embedding::new(values)
    }

    pub fn detection(x: f32, y: f32, w: f32, h: f32) -> Detection {
        Detection { x, y, width: w, height: h, confidence: 0.9 }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::roster::{EmbeddingInput, IdentityRecord, RosterCache};
    use image::{Rgb, RgbImage};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct Harness {
        matcher: FrameMatcher,
        detect_calls: Arc<AtomicUsize>,
        batches: Arc<Mutex<Vec<usize>>>,
    }

    fn harness(
        detections: Vec<crate::types::Detection>,
        embeddings: Vec<crate::types::Embedding>,
        fail: bool,
    ) -> Harness {
        let detect_calls = Arc::new(AtomicUsize::new(0));
        let batches = Arc::new(Mutex::new(Vec::new()));
        let pipeline = FramePipeline::new(
            Box::new(FixedDetector { detections, calls: Arc::clone(&detect_calls) }),
            Box::new(ScriptedEmbedder { embeddings, batches: Arc::clone(&batches), fail }),
            PipelineOptions::default(),
        );
        Harness {
            matcher: FrameMatcher::new(pipeline, DEFAULT_SIMILARITY_THRESHOLD),
            detect_calls,
            batches,
        }
    }

    fn frame() -> Frame {
        Frame::from_rgb(RgbImage::from_pixel(400, 300, Rgb([90, 90, 90]))).unwrap()
    }

    fn roster_ab() -> RosterCache {
        let cache = RosterCache::new();
        let record = |id: &str, head: &[f32]| IdentityRecord {
            id: id.to_string(),
            name: format!("Student {id}"),
            student_number: None,
            embedding: Some(EmbeddingInput::Sequence(embedding(head).values)),
        };
        cache.load_session("sec", vec![record("A", &[1.0, 0.0]), record("B", &[0.0, 1.0])]);
        cache
    }

    #[test]
    fn test_inactive_session_skips_detection() {
        let mut h = harness(vec![detection(10.0, 10.0, 20.0, 20.0)], vec![], false);
        let result = h.matcher.process_frame(&frame(), &Session::default()).unwrap();
        assert!(!result.detected);
        assert!(result.faces.is_empty());
        assert_eq!(result.error.as_deref(), Some(FrameResult::NO_SESSION));
        assert_eq!(h.detect_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_no_faces() {
        let mut h = harness(vec![], vec![], false);
        let roster = roster_ab();
        let result = h.matcher.process_frame(&frame(), &roster.snapshot()).unwrap();
        assert!(!result.detected);
        assert_eq!(result.num_faces, 0);
        assert!(result.error.is_none());
        assert!(h.batches.lock().unwrap().is_empty());
    }

    #[test]
    fn test_two_faces_match_two_identities() {
        let mut h = harness(
            vec![detection(10.0, 10.0, 30.0, 30.0), detection(100.0, 20.0, 30.0, 30.0)],
            vec![embedding(&[0.99, 0.01]), embedding(&[0.02, 0.98])],
            false,
        );
        let roster = roster_ab();
        let result = h.matcher.process_frame(&frame(), &roster.snapshot()).unwrap();

        assert!(result.detected);
        assert_eq!(result.num_faces, 2);
        assert_eq!(result.faces[0].identity_id.as_deref(), Some("A"));
        assert_eq!(result.faces[1].identity_id.as_deref(), Some("B"));
        assert!(result.faces.iter().all(|f| f.similarity.unwrap() > 0.9));
        // boxes come back in original-frame pixels (scale 0.5)
        assert_eq!(result.faces[1].bbox, BoundingBox::new(200, 40, 260, 100));
        // one batched call
        assert_eq!(*h.batches.lock().unwrap(), vec![2]);
    }

    #[test]
    fn test_empty_crop_dropped_from_batch_but_reported() {
        let mut h = harness(
            vec![detection(10.0, 10.0, 30.0, 30.0), detection(500.0, 500.0, 20.0, 20.0)],
            vec![embedding(&[1.0, 0.0])],
            false,
        );
        let roster = roster_ab();
        let result = h.matcher.process_frame(&frame(), &roster.snapshot()).unwrap();

        assert_eq!(*h.batches.lock().unwrap(), vec![1]);
        assert_eq!(result.num_faces, 2);
        assert!(result.faces[0].matched);
        assert_eq!(result.faces[1].box_index, 1);
        assert!(!result.faces[1].matched);
        assert_eq!(result.faces[1].similarity, None);
    }

    #[test]
    fn test_short_batch_degrades_to_unmatched() {
        let mut h = harness(
            vec![detection(10.0, 10.0, 30.0, 30.0), detection(100.0, 20.0, 30.0, 30.0)],
            vec![embedding(&[1.0, 0.0])],
            false,
        );
        let roster = roster_ab();
        let result = h.matcher.process_frame(&frame(), &roster.snapshot()).unwrap();
        assert_eq!(result.num_faces, 2);
        assert!(result.faces.iter().all(|f| !f.matched && f.similarity.is_none()));
    }

    #[test]
    fn test_embedder_failure_is_backend_error() {
        let mut h = harness(vec![detection(10.0, 10.0, 30.0, 30.0)], vec![], true);
        let roster = roster_ab();
        let err = h.matcher.process_frame(&frame(), &roster.snapshot()).unwrap_err();
        assert!(matches!(err, PipelineError::Embedder(_)));
    }

    #[test]
    fn test_matched_identities_distinct() {
        let mut h = harness(
            vec![
                detection(10.0, 10.0, 20.0, 20.0),
                detection(60.0, 10.0, 20.0, 20.0),
                detection(110.0, 10.0, 20.0, 20.0),
            ],
            vec![embedding(&[1.0, 0.0]), embedding(&[1.0, 0.0]), embedding(&[0.9, 0.1])],
            false,
        );
        let roster = roster_ab();
        let result = h.matcher.process_frame(&frame(), &roster.snapshot()).unwrap();
        let ids: Vec<_> = result
            .faces
            .iter()
            .filter(|f| f.matched)
            .filter_map(|f| f.identity_id.clone())
            .collect();
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(ids.len(), unique.len());
    }

    fn square_frame() -> Frame {
        let mut img = RgbImage::from_pixel(200, 200, Rgb([0, 0, 0]));
        for y in 60..140 {
            for x in 40..120 {
                img.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        Frame::from_rgb(img).unwrap()
    }

    fn detect_square(scale: f32) -> BoundingBox {
        let embedder = ScriptedEmbedder {
            embeddings: vec![],
            batches: Arc::default(),
            fail: false,
        };
        let mut pipeline = FramePipeline::new(
            Box::new(BrightRegionDetector),
            Box::new(embedder),
            PipelineOptions { detection_scale: scale, crop_padding: DEFAULT_CROP_PADDING },
        );
        let boxes = pipeline.detect(&square_frame()).unwrap();
        assert_eq!(boxes.len(), 1);
        boxes[0]
    }

    #[test]
    fn test_downscaled_detection_round_trips_within_one_pixel() {
        let direct = detect_square(1.0);
        assert_eq!(direct, BoundingBox::new(40, 60, 120, 140));

        let scaled = detect_square(0.5);
        for (a, b) in [
            (direct.left, scaled.left),
            (direct.top, scaled.top),
            (direct.right, scaled.right),
            (direct.bottom, scaled.bottom),
        ] {
            assert!((a - b).abs() <= 1, "direct {direct:?} vs scaled {scaled:?}");
        }
    }
}
