//! Parent: the post or product experiment a set of variants hangs off.
//!
//! Parents are owned by other systems; the engine only ever sees their ids.
//! The kind decides which selection algorithm applies.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::identity::Identity;

/// Which kind of entity owns a variant.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  AsRefStr,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ParentKind {
  /// A post (email). Variants are chosen by tier-scoped distribution rules.
  Post,
  /// A product experiment. Variants are chosen by relative weight.
  Experiment,
}

/// A reference to the owner of a group of variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParentRef {
  pub kind: ParentKind,
  pub id:   Uuid,
}

impl ParentRef {
  pub fn post(id: Uuid) -> Self { Self { kind: ParentKind::Post, id } }

  pub fn experiment(id: Uuid) -> Self {
    Self { kind: ParentKind::Experiment, id }
  }

  /// Whether `identity` may be bound to a variant of this parent.
  ///
  /// Experiments are shown on product pages, which have no subscription
  /// context; only users and buyer cookies can be assigned there.
  pub fn accepts(&self, identity: &Identity) -> bool {
    match self.kind {
      ParentKind::Post => true,
      ParentKind::Experiment => !matches!(identity, Identity::Subscription(_)),
    }
  }
}
