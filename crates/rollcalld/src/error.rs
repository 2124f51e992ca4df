use crate::engine::EngineError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rollcall_core::{DimensionMismatch, FrameError};
use thiserror::Error;

/// Errors returned by the single-shot HTTP endpoints.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    Decode(#[from] FrameError),
    #[error("{0}")]
    DimensionMismatch(#[from] DimensionMismatch),
    #[error("{0}")]
    InvalidRequest(String),
    #[error("processing failed: {0}")]
    Backend(String),
    #[error("recognition engine unavailable")]
    EngineUnavailable,
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Decode(_) | Self::DimensionMismatch(_) | Self::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::EngineUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<EngineError> for ServiceError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::ChannelClosed => Self::EngineUnavailable,
            other => Self::Backend(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ServiceError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidRequest(rejection.body_text())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
