//! Error types and axum `IntoResponse` implementation.

use axum::{
  http::{HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unauthorized")]
  Unauthorized,
  /// The configured admin hash is not a valid PHC string.
  #[error("invalid admin password hash: {0}")]
  InvalidPasswordHash(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    match self {
      Error::Unauthorized => {
        let mut res = (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        res.headers_mut().insert(
          header::WWW_AUTHENTICATE,
          HeaderValue::from_static("Basic realm=\"vary-admin\""),
        );
        res
      }
      Error::InvalidPasswordHash(msg) => {
        (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response()
      }
    }
  }
}
