//! Face embedding capability and the ONNX FaceNet-style backend.
//!
//! Faces are embedded in one batched inference call per frame.

use crate::types::Embedding;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const EMBEDDER_MEAN: f32 = 127.5;
const EMBEDDER_STD: f32 = 128.0;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face crop is {actual}x{actual}, embedder expects {expected}x{expected}")]
    WrongInputSize { expected: u32, actual: u32 },
    #[error("embedder returned {returned} vectors for {submitted} faces")]
    BatchMismatch { submitted: usize, returned: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Capability: turn square face crops into embeddings, one per input, in order.
pub trait FaceEmbedder: Send {
    fn backend(&self) -> &'static str;

    /// Side length of the square crops this embedder consumes.
    fn input_size(&self) -> u32;

    fn embed_batch(&mut self, faces: &[RgbImage]) -> Result<Vec<Embedding>, EmbedderError>;
}

/// FaceNet-style ONNX embedder: NCHW float input, one L2-normalized row per face.
pub struct OnnxEmbedder {
    session: Session,
    input_size: u32,
}

impl OnnxEmbedder {
    pub fn load(
        model_path: &Path,
        input_size: u32,
        intra_threads: usize,
    ) -> Result<Self, EmbedderError> {
        if !model_path.exists() {
            return Err(EmbedderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            input_size,
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            "loaded embedding model"
        );

        Ok(Self { session, input_size })
    }

    /// Stack crops into an N×3×S×S tensor normalized to roughly [-1, 1].
    fn preprocess(faces: &[RgbImage], size: u32) -> Result<Array4<f32>, EmbedderError> {
        let s = size as usize;
        let mut tensor = Array4::<f32>::zeros((faces.len(), 3, s, s));

        for (n, face) in faces.iter().enumerate() {
            if face.dimensions() != (size, size) {
                return Err(EmbedderError::WrongInputSize {
                    expected: size,
                    actual: face.width(),
                });
            }
            for (x, y, pixel) in face.enumerate_pixels() {
                for c in 0..3 {
                    tensor[[n, c, y as usize, x as usize]] =
                        (pixel.0[c] as f32 - EMBEDDER_MEAN) / EMBEDDER_STD;
                }
            }
        }

        Ok(tensor)
    }
}

impl FaceEmbedder for OnnxEmbedder {
    fn backend(&self) -> &'static str {
        "onnx"
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn embed_batch(&mut self, faces: &[RgbImage]) -> Result<Vec<Embedding>, EmbedderError> {
        if faces.is_empty() {
            return Ok(Vec::new());
        }

        let input = Self::preprocess(faces, self.input_size)?;
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (shape, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        split_rows(raw, shape.first().copied().unwrap_or(0) as usize, faces.len())
    }
}

/// Split a flat N×D output into N normalized embeddings.
fn split_rows(raw: &[f32], rows: usize, submitted: usize) -> Result<Vec<Embedding>, EmbedderError> {
    if rows != submitted || rows == 0 || raw.len() % rows != 0 {
        return Err(EmbedderError::BatchMismatch { submitted, returned: rows });
    }

    let dim = raw.len() / rows;
    Ok(raw
        .chunks_exact(dim)
        .map(|row| {
            let mut embedding = Embedding::new(row.to_vec());
            embedding.normalize();
            embedding
        })
        .collect())
}
