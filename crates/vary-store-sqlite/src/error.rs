//! Error type for `vary-store-sqlite`.

use thiserror::Error;
use vary_core::store::{ErrorClass, StoreError};

#[derive(Debug, Error)]
pub enum Error {
  /// Input rejected by domain validation.
  #[error(transparent)]
  Core(#[from] vary_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A stored column held a value no domain type accepts.
  #[error("corrupt row: {0}")]
  Corrupt(String),

  #[error("variant not found: {0}")]
  VariantNotFound(uuid::Uuid),

  #[error("rule not found: {0}")]
  RuleNotFound(uuid::Uuid),

  #[error("variant {variant_id} already has a rule for bucket {bucket_id}")]
  DuplicateRule {
    variant_id: uuid::Uuid,
    bucket_id:  uuid::Uuid,
  },
}

impl StoreError for Error {
  fn class(&self) -> ErrorClass {
    match self {
      Error::Core(e) => e.class(),
      Error::VariantNotFound(_) | Error::RuleNotFound(_) => ErrorClass::NotFound,
      Error::DuplicateRule { .. } => ErrorClass::Conflict,
      _ => ErrorClass::Internal,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
