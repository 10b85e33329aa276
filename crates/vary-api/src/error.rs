//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;
use vary_core::{
  engine::EngineError,
  store::{ErrorClass, StoreError},
};

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("conflict: {0}")]
  Conflict(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ApiError {
  /// Map a backend error onto a status by its [`ErrorClass`].
  pub fn store<E: StoreError>(e: E) -> Self {
    match e.class() {
      ErrorClass::Invalid => ApiError::BadRequest(e.to_string()),
      ErrorClass::NotFound => ApiError::NotFound(e.to_string()),
      ErrorClass::Conflict => ApiError::Conflict(e.to_string()),
      ErrorClass::Internal => ApiError::Store(Box::new(e)),
    }
  }
}

impl<E: StoreError> From<EngineError<E>> for ApiError {
  fn from(e: EngineError<E>) -> Self {
    match e {
      EngineError::AssignmentNotFound(id) => {
        ApiError::NotFound(format!("assignment {id} not found"))
      }
      EngineError::Store(e) => ApiError::store(e),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
      ApiError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
      ApiError::Store(e) => {
        error!(error = %e, "store failure while handling request");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
      }
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}
