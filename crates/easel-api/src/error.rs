//! API error taxonomy.
//!
//! Every error surfaces to the caller as a stable `{code, message}` JSON
//! body; conflict is distinct from not-found so the editor can
//! refetch-and-retry instead of blindly overwriting.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use easel_queue::QueueError;
use easel_store::StoreError;
use serde::Serialize;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
  #[error("canvas does not exist")]
  CanvasNotFound,

  #[error("run does not exist")]
  RunNotFound,

  #[error("canvas version conflict, refetch and retry")]
  VersionConflict,

  #[error("{0}")]
  Validation(String),

  #[error("internal error")]
  Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ApiError {
  fn status(&self) -> StatusCode {
    match self {
      Self::CanvasNotFound | Self::RunNotFound => StatusCode::NOT_FOUND,
      Self::VersionConflict => StatusCode::CONFLICT,
      Self::Validation(_) => StatusCode::BAD_REQUEST,
      Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  fn code(&self) -> &'static str {
    match self {
      Self::CanvasNotFound => "CANVAS_NOT_FOUND",
      Self::RunNotFound => "RUN_NOT_FOUND",
      Self::VersionConflict => "CANVAS_VERSION_CONFLICT",
      Self::Validation(_) => "VALIDATION_ERROR",
      Self::Internal(_) => "INTERNAL_ERROR",
    }
  }
}

#[derive(Serialize)]
struct ErrorBody {
  code: &'static str,
  message: String,
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    if let Self::Internal(source) = &self {
      error!(error = %source, "request failed");
    }
    let body = ErrorBody {
      code: self.code(),
      message: self.to_string(),
    };
    (self.status(), Json(body)).into_response()
  }
}

impl From<StoreError> for ApiError {
  fn from(err: StoreError) -> Self {
    match err {
      StoreError::CanvasNotFound { .. } => Self::CanvasNotFound,
      StoreError::VersionConflict { .. } => Self::VersionConflict,
      other => Self::Internal(Box::new(other)),
    }
  }
}

impl From<QueueError> for ApiError {
  fn from(err: QueueError) -> Self {
    Self::Internal(Box::new(err))
  }
}

impl From<JsonRejection> for ApiError {
  fn from(rejection: JsonRejection) -> Self {
    Self::Validation(rejection.body_text())
  }
}
