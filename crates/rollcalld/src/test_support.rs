//! Stub backends and fixtures for handler tests.
//!
//! Faces are solid colour blocks on a black frame. The detector reports one box
//! per block; the embedder returns the crop's mean colour, so a red face embeds
//! as `[1, 0, 0]`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{Rgb, RgbImage};
use rollcall_core::{
    Detection, DetectorError, EmbedderError, Embedding, FaceDetector, FaceEmbedder, Frame,
    FrameMatcher, FramePipeline, PipelineOptions,
};
use std::io::Cursor;

pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);

const BLOCK: u32 = 40;
const GAP: u32 = 20;

struct BlockDetector;

impl FaceDetector for BlockDetector {
    fn backend(&self) -> &'static str {
        "stub-detector"
    }

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        let lit = |x: u32| (0..frame.height()).find(|&y| frame.get_pixel(x, y).0 != [0, 0, 0]);

        let mut detections = Vec::new();
        let mut start: Option<(u32, u32)> = None;
        for x in 0..=frame.width() {
            let top = if x < frame.width() { lit(x) } else { None };
            match (start, top) {
                (None, Some(y)) => start = Some((x, y)),
                (Some((x0, y0)), None) => {
                    let bottom = (y0..frame.height())
                        .take_while(|&y| frame.get_pixel(x0, y).0 != [0, 0, 0])
                        .count() as f32;
                    detections.push(Detection {
                        x: x0 as f32,
                        y: y0 as f32,
                        width: (x - x0) as f32,
                        height: bottom,
                        confidence: 1.0,
                    });
                    start = None;
                }
                _ => {}
            }
        }
        Ok(detections)
    }
}

/// Block detector that panics on any frame containing a green pixel.
struct PanicOnGreenDetector;

impl FaceDetector for PanicOnGreenDetector {
    fn backend(&self) -> &'static str {
        "stub-detector"
    }

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        if frame.pixels().any(|p| *p == GREEN) {
            panic!("detector crashed on green");
        }
        BlockDetector.detect(frame)
    }
}

struct MeanColorEmbedder;

impl FaceEmbedder for MeanColorEmbedder {
    fn backend(&self) -> &'static str {
        "stub-embedder"
    }

    fn input_size(&self) -> u32 {
        8
    }

    fn embed_batch(&mut self, faces: &[RgbImage]) -> Result<Vec<Embedding>, EmbedderError> {
        Ok(faces
            .iter()
            .map(|face| {
                let n = (face.width() * face.height()) as f32;
                let mut sum = [0.0f32; 3];
                for p in face.pixels() {
                    for (s, c) in sum.iter_mut().zip(p.0) {
                        *s += c as f32 / 255.0;
                    }
                }
                Embedding::new(sum.iter().map(|s| s / n).collect())
            })
            .collect())
    }
}

/// Matcher over the stub backends: full-resolution detection, unpadded crops.
pub fn stub_matcher() -> FrameMatcher {
    let pipeline = FramePipeline::new(
        Box::new(BlockDetector),
        Box::new(MeanColorEmbedder),
        PipelineOptions {
            detection_scale: 1.0,
            crop_padding: 0.0,
        },
    );
    FrameMatcher::new(pipeline, 0.9)
}

/// Like [`stub_matcher`], but the detector panics on green frames.
pub fn panicking_matcher() -> FrameMatcher {
    let pipeline = FramePipeline::new(
        Box::new(PanicOnGreenDetector),
        Box::new(MeanColorEmbedder),
        PipelineOptions {
            detection_scale: 1.0,
            crop_padding: 0.0,
        },
    );
    FrameMatcher::new(pipeline, 0.9)
}

fn colored_image(colors: &[Rgb<u8>]) -> RgbImage {
    let width = GAP + colors.len() as u32 * (BLOCK + GAP);
    let mut img = RgbImage::new(width.max(GAP * 2), BLOCK + GAP * 2);
    for (i, color) in colors.iter().enumerate() {
        let x0 = GAP + i as u32 * (BLOCK + GAP);
        for y in GAP..GAP + BLOCK {
            for x in x0..x0 + BLOCK {
                img.put_pixel(x, y, *color);
            }
        }
    }
    img
}

/// A black frame with one solid block per colour, left to right.
pub fn colored_frame(colors: &[Rgb<u8>]) -> Frame {
    Frame::from_rgb(colored_image(colors)).unwrap()
}

/// The same frame PNG-encoded as a `data:` URL.
pub fn encoded_frame(colors: &[Rgb<u8>]) -> String {
    let mut png = Vec::new();
    colored_image(colors)
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .unwrap();
    format!("data:image/png;base64,{}", STANDARD.encode(png))
}
