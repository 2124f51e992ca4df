//! Frame type and payload decoding: base64 / data URL → RGB pixel buffer.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::RgbImage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("no image provided")]
    Empty,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid image format: {0}")]
    Decode(#[from] image::ImageError),
    #[error("image dimensions are zero")]
    ZeroDimensions,
}

/// A decoded video frame in 8-bit RGB.
pub struct Frame {
    rgb: RgbImage,
}

impl Frame {
    pub fn from_rgb(rgb: RgbImage) -> Result<Self, FrameError> {
        if rgb.width() == 0 || rgb.height() == 0 {
            return Err(FrameError::ZeroDimensions);
        }
        Ok(Self { rgb })
    }

    /// Decode an encoded image (JPEG, PNG, ...) from raw bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.is_empty() {
            return Err(FrameError::Empty);
        }
        let img = image::load_from_memory(bytes)?;
        Self::from_rgb(img.to_rgb8())
    }

    /// Decode a base64 payload, with or without a `data:image/...;base64,` prefix.
    pub fn decode_base64(payload: &str) -> Result<Self, FrameError> {
        let encoded = strip_data_url(payload).trim();
        if encoded.is_empty() {
            return Err(FrameError::Empty);
        }
        let bytes = STANDARD.decode(encoded)?;
        Self::decode(&bytes)
    }

    pub fn width(&self) -> u32 {
        self.rgb.width()
    }

    pub fn height(&self) -> u32 {
        self.rgb.height()
    }

    pub fn rgb(&self) -> &RgbImage {
        &self.rgb
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// Everything after the first comma, if any.
fn strip_data_url(payload: &str) -> &str {
    match payload.split_once(',') {
        Some((_, rest)) => rest,
        None => payload,
    }
}
