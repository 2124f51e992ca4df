//! rollcall-core — real-time multi-face matching against an enrolled roster.
//!
//! A frame is downscaled and run through a [`FaceDetector`], every face is
//! cropped and embedded in one [`FaceEmbedder`] batch, and detected faces are
//! greedily assigned to the identities of the live [`Session`].

pub mod detector;
pub mod embedder;
pub mod frame;
pub mod geometry;
pub mod matcher;
pub mod pipeline;
pub mod roster;
pub mod seeta;
pub mod types;

pub use detector::{probe_detector, DetectorConfig, DetectorError, FaceDetector, ScrfdDetector};
pub use embedder::{EmbedderError, FaceEmbedder, OnnxEmbedder};
pub use frame::{Frame, FrameError};
pub use pipeline::{FrameMatcher, FramePipeline, PipelineError, PipelineOptions};
pub use roster::{EmbeddingInput, IdentityRecord, RosterCache, Session};
pub use seeta::SeetaDetector;
pub use types::{
    cosine_similarity, BoundingBox, DetectedFace, Detection, DimensionMismatch, Embedding,
    EnrolledIdentity, FrameResult, MatchResult,
};
