//! Coordinate rescaling between the detection pass and the original frame,
//! and padded face cropping for the embedder.

use crate::types::{BoundingBox, Detection};
use image::imageops::{self, FilterType};
use image::RgbImage;

/// Region of the original frame handed to the embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Map a detection made on a frame downscaled by `factor` back to original-frame
/// pixels. Each edge is divided by `factor` and truncated toward zero.
pub fn rescale(detection: &Detection, factor: f32) -> BoundingBox {
    let back = |v: f32| ((v / factor) as i32).max(0);
    BoundingBox::new(
        back(detection.x),
        back(detection.y),
        back(detection.right()),
        back(detection.bottom()),
    )
}

/// Expand `bbox` by `padding` of its size on each side and clamp to the frame.
///
/// Returns `None` when nothing of the box survives clamping.
pub fn padded_crop_region(
    bbox: &BoundingBox,
    padding: f32,
    frame_width: u32,
    frame_height: u32,
) -> Option<CropRegion> {
    let pad_x = (bbox.width() as f32 * padding) as i64;
    let pad_y = (bbox.height() as f32 * padding) as i64;

    let x1 = (bbox.left as i64 - pad_x).clamp(0, frame_width as i64);
    let y1 = (bbox.top as i64 - pad_y).clamp(0, frame_height as i64);
    let x2 = (bbox.right as i64 + pad_x).clamp(0, frame_width as i64);
    let y2 = (bbox.bottom as i64 + pad_y).clamp(0, frame_height as i64);

    if x2 <= x1 || y2 <= y1 {
        return None;
    }

    Some(CropRegion {
        x: x1 as u32,
        y: y1 as u32,
        width: (x2 - x1) as u32,
        height: (y2 - y1) as u32,
    })
}

/// Cut `region` out of `frame` and resize it to a `size`×`size` square.
pub fn crop_face(frame: &RgbImage, region: CropRegion, size: u32) -> RgbImage {
    let face =
        imageops::crop_imm(frame, region.x, region.y, region.width, region.height).to_image();
    imageops::resize(&face, size, size, FilterType::Triangle)
}

/// Downscale a frame for the detection pass. A factor of 1.0 borrows the frame as-is.
pub fn downscale(frame: &RgbImage, factor: f32) -> std::borrow::Cow<'_, RgbImage> {
    if (factor - 1.0).abs() < f32::EPSILON {
        return std::borrow::Cow::Borrowed(frame);
    }
    let w = ((frame.width() as f32 * factor) as u32).max(1);
    let h = ((frame.height() as f32 * factor) as u32).max(1);
    std::borrow::Cow::Owned(imageops::resize(frame, w, h, FilterType::Triangle))
}
