//! Error types for `vary-core`.

use thiserror::Error;
use uuid::Uuid;

use crate::{parent::ParentKind, store::ErrorClass};

#[derive(Debug, Error)]
pub enum Error {
  #[error("variant not found: {0}")]
  VariantNotFound(Uuid),

  #[error("rule not found: {0}")]
  RuleNotFound(Uuid),

  #[error("assignment not found: {0}")]
  AssignmentNotFound(Uuid),

  #[error("variant name must not be empty")]
  EmptyName,

  #[error("price override must not be negative (got {0})")]
  NegativePrice(i64),

  #[error("only post variants can be marked as control")]
  ControlOnNonPost,

  #[error("only experiment variants carry a weight")]
  WeightOnNonExperiment,

  #[error("rules can only be attached to post variants, not {0}")]
  RuleOnNonPost(ParentKind),

  #[error("{0} rules require a distribution value")]
  MissingDistributionValue(&'static str),

  #[error("{0} rules do not take a distribution value")]
  UnexpectedDistributionValue(&'static str),

  #[error("percentage must be between 1 and 100 (got {0})")]
  PercentageOutOfRange(u32),

  #[error("count must be greater than zero")]
  ZeroCount,

  #[error("unknown distribution type: {0:?}")]
  UnknownDistributionType(String),

  #[error("unknown parent kind: {0:?}")]
  UnknownParentKind(String),
}

impl Error {
  pub fn class(&self) -> ErrorClass {
    match self {
      Error::VariantNotFound(_) | Error::RuleNotFound(_) | Error::AssignmentNotFound(_) => {
        ErrorClass::NotFound
      }
      _ => ErrorClass::Invalid,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
