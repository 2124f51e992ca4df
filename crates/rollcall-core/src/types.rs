use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// Raw detector output in the detector's own input pixel space.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl Detection {
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

/// Face bounding box in original-frame pixel coordinates.
///
/// Always satisfies `right >= left` and `bottom >= top`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BoundingBox {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl BoundingBox {
    /// Build a box from two corners, swapping edges if they arrive inverted.
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left: left.min(right),
            top: top.min(bottom),
            right: left.max(right),
            bottom: top.max(bottom),
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

impl Serialize for BoundingBox {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("BoundingBox", 6)?;
        s.serialize_field("left", &self.left)?;
        s.serialize_field("top", &self.top)?;
        s.serialize_field("right", &self.right)?;
        s.serialize_field("bottom", &self.bottom)?;
        s.serialize_field("width", &self.width())?;
        s.serialize_field("height", &self.height())?;
        s.end()
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("embedding dimension mismatch: {left} vs {right}")]
pub struct DimensionMismatch {
    pub left: usize,
    pub right: usize,
}

/// Cosine similarity between two equal-length vectors.
///
/// Returns a value in [-1, 1]. A zero-norm input, or one whose components
/// overflow the arithmetic, yields 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, DimensionMismatch> {
    if a.len() != b.len() {
        return Err(DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    let sim = dot / denom;
    if denom > 0.0 && sim.is_finite() {
        Ok(sim.clamp(-1.0, 1.0))
    } else {
        Ok(0.0)
    }
}

/// Face embedding vector (128-dim for dlib-style models, 512-dim for FaceNet/ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity against another embedding of the same dimension.
    pub fn similarity(&self, other: &Embedding) -> Result<f32, DimensionMismatch> {
        cosine_similarity(&self.values, &other.values)
    }

    /// Scale to unit length in place. Zero vectors are left untouched.
    pub fn normalize(&mut self) {
        let norm: f32 = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            self.values.iter_mut().for_each(|x| *x /= norm);
        }
    }
}

/// An identity enrolled into the live roster.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrolledIdentity {
    pub id: String,
    pub display_name: String,
    pub external_number: Option<String>,
    pub embedding: Embedding,
}

/// A face found in one frame. Lives only for that frame's processing.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    /// Position in detector output order.
    pub box_index: usize,
    pub bbox: BoundingBox,
    /// `None` when the padded crop was empty or the embedder could not produce a vector.
    pub embedding: Option<Embedding>,
}

/// Outcome of matching one detected face against the roster.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    #[serde(rename = "index")]
    pub box_index: usize,
    pub matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_id: Option<String>,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(rename = "studentNumber", skip_serializing_if = "Option::is_none")]
    pub external_number: Option<String>,
    #[serde(rename = "confidence")]
    pub similarity: Option<f32>,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

impl MatchResult {
    pub const UNKNOWN: &'static str = "Unknown";

    pub fn unmatched(face: &DetectedFace, similarity: Option<f32>) -> Self {
        Self {
            box_index: face.box_index,
            matched: false,
            identity_id: None,
            display_name: Self::UNKNOWN.to_string(),
            external_number: None,
            similarity,
            bbox: face.bbox,
        }
    }
}

/// Per-frame response payload shared by the single-shot and streaming endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameResult {
    pub detected: bool,
    pub faces: Vec<MatchResult>,
    pub num_faces: usize,
    pub processing_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FrameResult {
    pub const NO_SESSION: &'static str = "no session loaded";

    /// Nothing detected; not an error.
    pub fn empty(processing_time_ms: u64) -> Self {
        Self {
            detected: false,
            faces: Vec::new(),
            num_faces: 0,
            processing_time_ms,
            error: None,
        }
    }

    /// In-band failure for one frame.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::empty(0)
        }
    }

    pub fn no_session() -> Self {
        Self::failure(Self::NO_SESSION)
    }

    pub fn from_matches(faces: Vec<MatchResult>, processing_time_ms: u64) -> Self {
        Self {
            detected: !faces.is_empty(),
            num_faces: faces.len(),
            faces,
            processing_time_ms,
            error: None,
        }
    }
}
