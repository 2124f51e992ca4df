//! HTTP routes: health, single-shot recognition, roster lifecycle and the
//! embedding utilities used by enrollment tooling.

use crate::engine::EngineHandle;
use crate::error::ServiceError;
use crate::stream;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use rollcall_core::{
    cosine_similarity, BoundingBox, EmbeddingInput, Frame, FrameResult, IdentityRecord, RosterCache,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

pub struct AppState {
    pub engine: EngineHandle,
    pub roster: Arc<RosterCache>,
    pub threshold: f32,
}

impl AppState {
    pub fn new(engine: EngineHandle, roster: Arc<RosterCache>, threshold: f32) -> Arc<Self> {
        Arc::new(Self { engine, roster, threshold })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/recognize", post(recognize))
        .route("/ws/recognize", get(stream::ws_recognize))
        .route("/session/load", post(load_session))
        .route("/session/clear", post(clear_session))
        .route("/compare-embeddings", post(compare_embeddings))
        .route("/extract-embeddings", post(extract_embeddings))
        .route("/verify", post(verify))
        .with_state(state)
}

/// Base64 decoding and image parsing are CPU-bound; keep them off the reactor.
pub(crate) async fn decode_frame(image: String) -> Result<Frame, ServiceError> {
    tokio::task::spawn_blocking(move || Frame::decode_base64(&image))
        .await
        .map_err(|e| ServiceError::Backend(e.to_string()))?
        .map_err(ServiceError::from)
}

fn embedding_values(input: EmbeddingInput, field: &str) -> Result<Vec<f32>, ServiceError> {
    let values = input.into_values();
    if values.is_empty() {
        return Err(ServiceError::InvalidRequest(format!("{field} must not be empty")));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(ServiceError::InvalidRequest(format!("{field} contains non-finite values")));
    }
    Ok(values)
}

#[derive(Serialize)]
struct ServiceInfo {
    service: &'static str,
    version: &'static str,
    detector: &'static str,
    embedder: &'static str,
    status: &'static str,
}

async fn root(State(state): State<Arc<AppState>>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: "rollcalld",
        version: env!("CARGO_PKG_VERSION"),
        detector: state.engine.detector_backend(),
        embedder: state.engine.embedder_backend(),
        status: "running",
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    detector: &'static str,
    embedder: &'static str,
    session_active: bool,
    identity_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    section_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    loaded_at: Option<DateTime<Utc>>,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let session = state.roster.snapshot();
    Json(HealthResponse {
        status: "ok",
        detector: state.engine.detector_backend(),
        embedder: state.engine.embedder_backend(),
        session_active: session.active,
        identity_count: session.identities.len(),
        section_id: session.section_id.clone(),
        loaded_at: session.loaded_at,
    })
}

#[derive(Deserialize)]
pub(crate) struct ImageRequest {
    #[serde(default)]
    pub image: Option<String>,
}

async fn recognize(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ImageRequest>, JsonRejection>,
) -> Result<Json<FrameResult>, ServiceError> {
    let Json(req) = payload?;
    let session = state.roster.snapshot();
    if !session.active {
        return Ok(Json(FrameResult::no_session()));
    }
    let frame = decode_frame(req.image.unwrap_or_default()).await?;
    Ok(Json(state.engine.recognize(frame, session).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadSessionRequest {
    #[serde(alias = "section_id")]
    section_id: String,
    #[serde(default, alias = "students")]
    identities: Vec<IdentityRecord>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoadSessionResponse {
    success: bool,
    count_loaded: usize,
    section_id: String,
}

async fn load_session(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoadSessionRequest>, JsonRejection>,
) -> Result<Json<LoadSessionResponse>, ServiceError> {
    let Json(req) = payload?;
    let count_loaded = state.roster.load_session(req.section_id.clone(), req.identities);
    Ok(Json(LoadSessionResponse {
        success: true,
        count_loaded,
        section_id: req.section_id,
    }))
}

#[derive(Serialize)]
struct ClearResponse {
    success: bool,
}

async fn clear_session(State(state): State<Arc<AppState>>) -> Json<ClearResponse> {
    state.roster.clear_session();
    Json(ClearResponse { success: true })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompareRequest {
    #[serde(alias = "embedding1")]
    embedding_a: EmbeddingInput,
    #[serde(alias = "embedding2")]
    embedding_b: EmbeddingInput,
}

#[derive(Serialize)]
struct CompareResponse {
    similarity: f32,
    threshold: f32,
    #[serde(rename = "match")]
    is_match: bool,
    confidence: f32,
}

async fn compare_embeddings(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CompareRequest>, JsonRejection>,
) -> Result<Json<CompareResponse>, ServiceError> {
    let Json(req) = payload?;
    let a = embedding_values(req.embedding_a, "embeddingA")?;
    let b = embedding_values(req.embedding_b, "embeddingB")?;
    let similarity = cosine_similarity(&a, &b)?;
    Ok(Json(CompareResponse {
        similarity,
        threshold: state.threshold,
        is_match: similarity >= state.threshold,
        confidence: similarity * 100.0,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExtractedFace {
    index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    embedding: Option<Vec<f32>>,
    embedding_size: usize,
    #[serde(rename = "box")]
    bbox: BoundingBox,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExtractResponse {
    detected: bool,
    faces: Vec<ExtractedFace>,
    num_faces: usize,
    processing_time_ms: u64,
}

async fn extract_embeddings(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ImageRequest>, JsonRejection>,
) -> Result<Json<ExtractResponse>, ServiceError> {
    let Json(req) = payload?;
    let started = Instant::now();
    let frame = decode_frame(req.image.unwrap_or_default()).await?;
    let faces: Vec<ExtractedFace> = state
        .engine
        .analyze(frame)
        .await?
        .into_iter()
        .map(|face| ExtractedFace {
            index: face.box_index,
            embedding_size: face.embedding.as_ref().map_or(0, |e| e.dimension()),
            embedding: face.embedding.map(|e| e.values),
            bbox: face.bbox,
        })
        .collect();

    Ok(Json(ExtractResponse {
        detected: !faces.is_empty(),
        num_faces: faces.len(),
        faces,
        processing_time_ms: started.elapsed().as_millis() as u64,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequest {
    #[serde(default)]
    image: Option<String>,
    #[serde(alias = "stored_embedding")]
    stored_embedding: EmbeddingInput,
}

#[derive(Serialize)]
struct VerifyResponse {
    verified: bool,
    similarity: f32,
    threshold: f32,
    confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl VerifyResponse {
    fn rejected(threshold: f32, error: &str) -> Self {
        Self {
            verified: false,
            similarity: 0.0,
            threshold,
            confidence: 0.0,
            error: Some(error.to_string()),
        }
    }
}

async fn verify(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Json<VerifyResponse>, ServiceError> {
    let Json(req) = payload?;
    let stored = embedding_values(req.stored_embedding, "storedEmbedding")?;
    let frame = decode_frame(req.image.unwrap_or_default()).await?;

    let faces = state.engine.analyze(frame).await?;
    let Some(face) = faces.into_iter().next() else {
        return Ok(Json(VerifyResponse::rejected(state.threshold, "no face detected")));
    };
    let Some(embedding) = face.embedding else {
        return Ok(Json(VerifyResponse::rejected(state.threshold, "face could not be embedded")));
    };

    let similarity = cosine_similarity(&embedding.values, &stored)?;
    let verified = similarity >= state.threshold;
    tracing::debug!(similarity, verified, "verification");
    Ok(Json(VerifyResponse {
        verified,
        similarity,
        threshold: state.threshold,
        confidence: similarity * 100.0,
        error: None,
    }))
}
