//! Assignment: the durable binding of one identity to one variant.
//!
//! An assignment is created once, on first contact, and afterwards only ever
//! gains timestamps: `exposed_at` on first render, `converted_at` on the first
//! attributable purchase. Neither is overwritten once set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{identity::Identity, parent::ParentRef, variant::Variant};

/// A persisted assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
  pub assignment_id: Uuid,
  pub variant_id:    Uuid,
  /// Denormalised from the variant so exclusivity per parent can be
  /// enforced by the store.
  pub parent:        ParentRef,
  /// The tier the identity was in when assigned; `None` for experiments and
  /// for posts resolved without a tier.
  pub bucket_id:     Option<Uuid>,
  pub identity:      Identity,
  pub assigned_at:   DateTime<Utc>,
  pub exposed_at:    Option<DateTime<Utc>>,
  pub converted_at:  Option<DateTime<Utc>>,
  pub purchase_id:   Option<Uuid>,
}

impl Assignment {
  pub fn state(&self) -> AssignmentState {
    if self.converted_at.is_some() {
      AssignmentState::Converted
    } else if self.exposed_at.is_some() {
      AssignmentState::Exposed
    } else {
      AssignmentState::Assigned
    }
  }
}

/// Coarse progress of an assignment. Exposure and conversion are independent
/// one-way flags; a conversion may be recorded without a prior exposure, in
/// which case the state reads `Converted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentState {
  Assigned,
  Exposed,
  Converted,
}

/// Input for creating an assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAssignment {
  pub variant_id: Uuid,
  pub parent:     ParentRef,
  pub bucket_id:  Option<Uuid>,
  pub identity:   Identity,
}

/// Outcome of an insert guarded by uniqueness constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insert<T> {
  Created(T),
  /// A uniqueness or referential constraint rejected the row: another writer
  /// bound the identity first, or the chosen variant vanished.
  Conflict,
}

/// Outcome of a first-write-wins timestamp update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
  /// This call set the timestamp.
  First(Assignment),
  /// The timestamp was already set; the assignment is returned unchanged.
  Already(Assignment),
}

impl Recorded {
  pub fn assignment(&self) -> &Assignment {
    match self {
      Self::First(a) | Self::Already(a) => a,
    }
  }

  pub fn into_assignment(self) -> Assignment {
    match self {
      Self::First(a) | Self::Already(a) => a,
    }
  }

  pub fn is_first(&self) -> bool { matches!(self, Self::First(_)) }
}

/// What [`Engine::find_or_assign`](crate::engine::Engine::find_or_assign)
/// hands back: the variant to render and the binding behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
  pub variant:    Variant,
  pub assignment: Assignment,
  /// `true` when this call created the binding.
  pub created:    bool,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn assignment() -> Assignment {
    Assignment {
      assignment_id: Uuid::new_v4(),
      variant_id:    Uuid::new_v4(),
      parent:        ParentRef::post(Uuid::new_v4()),
      bucket_id:     None,
      identity:      Identity::User(Uuid::new_v4()),
      assigned_at:   Utc::now(),
      exposed_at:    None,
      converted_at:  None,
      purchase_id:   None,
    }
  }

  #[test]
  fn state_follows_timestamps() {
    let mut a = assignment();
    assert_eq!(a.state(), AssignmentState::Assigned);
    a.exposed_at = Some(Utc::now());
    assert_eq!(a.state(), AssignmentState::Exposed);
    a.converted_at = Some(Utc::now());
    assert_eq!(a.state(), AssignmentState::Converted);
  }

  #[test]
  fn conversion_without_exposure_is_converted() {
    let mut a = assignment();
    a.converted_at = Some(Utc::now());
    assert_eq!(a.state(), AssignmentState::Converted);
  }
}
