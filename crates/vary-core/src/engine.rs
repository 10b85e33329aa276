//! The assignment engine: `find_or_assign` and exposure/conversion recording.
//!
//! An existing assignment is authoritative. Selection runs only for an
//! identity with no binding to the parent yet, and its result is persisted
//! through the store's uniqueness constraints rather than an in-process lock.
//! Losing a race to a concurrent first request is therefore normal: the
//! engine re-reads the winner's binding and returns it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
  assignment::{Assignment, Insert, NewAssignment, Recorded, Resolution},
  identity::{Identity, IdentityParts},
  metrics::VariantMetrics,
  parent::{ParentKind, ParentRef},
  select::{self, SelectionInput},
  store::{Chooser, Claim, ErrorClass, StoreError, VariantStore},
};

// ─── Configuration ────────────────────────────────────────────────────────────

/// How capacity accounting behaves under concurrent first contacts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityPolicy {
  /// Select from a snapshot, insert, recover from constraint conflicts.
  /// Racing requests may briefly over-fill a limited rule.
  #[default]
  Optimistic,
  /// Count, select and insert inside one store transaction.
  Strict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  pub capacity_policy:     CapacityPolicy,
  /// Selection rounds before giving up on a binding whose insert keeps
  /// conflicting without a winner to re-read.
  pub max_assign_attempts: u32,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self { capacity_policy: CapacityPolicy::default(), max_assign_attempts: 3 }
  }
}

// ─── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError<E: std::error::Error + 'static> {
  #[error("assignment not found: {0}")]
  AssignmentNotFound(Uuid),

  #[error("store error: {0}")]
  Store(#[source] E),
}

impl<E: StoreError> EngineError<E> {
  pub fn class(&self) -> ErrorClass {
    match self {
      EngineError::AssignmentNotFound(_) => ErrorClass::NotFound,
      EngineError::Store(e) => e.class(),
    }
  }
}

type EngineResult<T, E> = Result<T, EngineError<E>>;

// ─── Engine ───────────────────────────────────────────────────────────────────

/// Resolves identities to variants on top of a [`VariantStore`].
pub struct Engine<S> {
  store:  S,
  config: EngineConfig,
}

impl<S: VariantStore> Engine<S> {
  pub fn new(store: S, config: EngineConfig) -> Self { Self { store, config } }

  pub fn store(&self) -> &S { &self.store }

  pub fn config(&self) -> &EngineConfig { &self.config }

  /// The variant `parts` is bound to under `parent`, binding it first if
  /// needed.
  ///
  /// Existing bindings are looked up for every present identity component,
  /// most durable first. A new binding is only created when exactly one
  /// component is present and the parent accepts it. `bucket_id` is the
  /// identity's tier; it scopes rule evaluation for posts and is ignored for
  /// experiments.
  ///
  /// `Ok(None)` means "render the unvaried content": no usable identity, no
  /// variants, or repeated conflicts with nothing to re-read.
  pub async fn find_or_assign(
    &self,
    parent:    ParentRef,
    bucket_id: Option<Uuid>,
    parts:     &IdentityParts,
  ) -> EngineResult<Option<Resolution>, S::Error> {
    if let Some(existing) = self.find_existing(parent, parts).await? {
      debug!(parent = %parent.id, assignment = %existing.assignment.assignment_id, "reusing assignment");
      return Ok(Some(existing));
    }

    let Some(identity) = parts.resolve() else {
      debug!(parent = %parent.id, "no single identity; serving base content");
      return Ok(None);
    };
    if !parent.accepts(&identity) {
      debug!(parent = %parent.id, kind = %identity, "identity kind not accepted by parent");
      return Ok(None);
    }

    let bucket_id = match parent.kind {
      ParentKind::Post => bucket_id,
      ParentKind::Experiment => None,
    };

    for attempt in 1..=self.config.max_assign_attempts.max(1) {
      let outcome = match self.config.capacity_policy {
        CapacityPolicy::Optimistic => self.assign_optimistic(parent, bucket_id, &identity).await?,
        CapacityPolicy::Strict => self.assign_strict(parent, bucket_id, &identity).await?,
      };
      match outcome {
        Attempt::Resolved(resolution) => return Ok(Some(resolution)),
        Attempt::NoVariant => return Ok(None),
        Attempt::Retry => {
          warn!(parent = %parent.id, attempt, "assignment conflicted with no winner; retrying");
        }
      }
    }

    warn!(
      parent = %parent.id,
      attempts = self.config.max_assign_attempts,
      "giving up on assignment; serving base content"
    );
    Ok(None)
  }

  /// The bound variant's price override, binding the identity if needed.
  pub async fn resolve_price_override(
    &self,
    parent:    ParentRef,
    bucket_id: Option<Uuid>,
    parts:     &IdentityParts,
  ) -> EngineResult<Option<i64>, S::Error> {
    Ok(
      self
        .find_or_assign(parent, bucket_id, parts)
        .await?
        .and_then(|r| r.variant.price_cents),
    )
  }

  /// An existing binding for `parts`, without ever creating one. Used by the
  /// purchase hook, which must not bind identities that never saw a variant.
  pub async fn find_assignment(
    &self,
    parent: ParentRef,
    parts:  &IdentityParts,
  ) -> EngineResult<Option<Assignment>, S::Error> {
    Ok(self.find_existing(parent, parts).await?.map(|r| r.assignment))
  }

  /// Mark the assignment as exposed. Later calls leave the first timestamp.
  pub async fn record_exposure(&self, assignment_id: Uuid) -> EngineResult<Recorded, S::Error> {
    let recorded = self
      .store
      .record_exposure(assignment_id, Utc::now())
      .await
      .map_err(EngineError::Store)?
      .ok_or(EngineError::AssignmentNotFound(assignment_id))?;
    if recorded.is_first() {
      debug!(assignment = %assignment_id, "exposure recorded");
    }
    Ok(recorded)
  }

  /// Attribute a purchase to the assignment. Only the first call counts.
  pub async fn record_conversion(
    &self,
    assignment_id: Uuid,
    purchase_id:   Uuid,
  ) -> EngineResult<Recorded, S::Error> {
    let recorded = self
      .store
      .record_conversion(assignment_id, purchase_id, Utc::now())
      .await
      .map_err(EngineError::Store)?
      .ok_or(EngineError::AssignmentNotFound(assignment_id))?;
    if recorded.is_first() {
      info!(assignment = %assignment_id, purchase = %purchase_id, "conversion recorded");
    } else {
      debug!(assignment = %assignment_id, purchase = %purchase_id, "conversion already recorded");
    }
    Ok(recorded)
  }

  /// Per-variant counters for a parent, in variant creation order.
  pub async fn variant_metrics(
    &self,
    parent: ParentRef,
  ) -> EngineResult<Vec<VariantMetrics>, S::Error> {
    let variants = self.store.list_variants(parent).await.map_err(EngineError::Store)?;
    Ok(variants.iter().map(|v| v.metrics()).collect())
  }

  // ── Internals ──────────────────────────────────────────────────────────────

  async fn find_existing(
    &self,
    parent: ParentRef,
    parts:  &IdentityParts,
  ) -> EngineResult<Option<Resolution>, S::Error> {
    for identity in parts.lookup_order() {
      if !parent.accepts(&identity) {
        continue;
      }
      let found = self
        .store
        .find_assignment(parent, &identity)
        .await
        .map_err(EngineError::Store)?;
      if let Some(assignment) = found
        && let Some(resolution) = self.resolution(assignment, false).await?
      {
        return Ok(Some(resolution));
      }
    }
    Ok(None)
  }

  async fn assign_optimistic(
    &self,
    parent:    ParentRef,
    bucket_id: Option<Uuid>,
    identity:  &Identity,
  ) -> EngineResult<Attempt, S::Error> {
    let input = self
      .store
      .selection_input(parent, bucket_id)
      .await
      .map_err(EngineError::Store)?;

    let chosen = {
      let mut rng = rand::thread_rng();
      select::choose(&input, &mut rng).map(|s| (s.variant.variant_id, s.reason))
    };
    let Some((variant_id, reason)) = chosen else {
      debug!(parent = %parent.id, "parent has no variants");
      return Ok(Attempt::NoVariant);
    };
    debug!(parent = %parent.id, variant = %variant_id, ?reason, "variant selected");

    let input = NewAssignment { variant_id, parent, bucket_id, identity: identity.clone() };
    match self.store.insert_assignment(input).await.map_err(EngineError::Store)? {
      Insert::Created(assignment) => {
        info!(
          parent = %parent.id,
          variant = %variant_id,
          identity = %identity,
          "identity assigned"
        );
        Ok(self.attempt(assignment, true).await?)
      }
      Insert::Conflict => {
        debug!(parent = %parent.id, identity = %identity, "lost first-assignment race; re-reading");
        let winner = self
          .store
          .find_assignment(parent, identity)
          .await
          .map_err(EngineError::Store)?;
        match winner {
          Some(assignment) => Ok(self.attempt(assignment, false).await?),
          None => Ok(Attempt::Retry),
        }
      }
    }
  }

  async fn assign_strict(
    &self,
    parent:    ParentRef,
    bucket_id: Option<Uuid>,
    identity:  &Identity,
  ) -> EngineResult<Attempt, S::Error> {
    let chooser: Chooser = Box::new(|input: &SelectionInput| {
      let mut rng = rand::thread_rng();
      select::choose(input, &mut rng).map(|s| s.variant.variant_id)
    });
    let claim = self
      .store
      .assign_exclusive(parent, bucket_id, identity.clone(), chooser)
      .await
      .map_err(EngineError::Store)?;
    match claim {
      Claim::Existing(assignment) => Ok(self.attempt(assignment, false).await?),
      Claim::Created(assignment) => {
        info!(
          parent = %parent.id,
          variant = %assignment.variant_id,
          identity = %identity,
          "identity assigned under strict capacity"
        );
        Ok(self.attempt(assignment, true).await?)
      }
      Claim::NoVariant => Ok(Attempt::NoVariant),
    }
  }

  async fn attempt(&self, assignment: Assignment, created: bool) -> EngineResult<Attempt, S::Error> {
    Ok(match self.resolution(assignment, created).await? {
      Some(resolution) => Attempt::Resolved(resolution),
      None => Attempt::Retry,
    })
  }

  /// Pair an assignment with its variant; `None` if the variant was deleted
  /// in between.
  async fn resolution(
    &self,
    assignment: Assignment,
    created:    bool,
  ) -> EngineResult<Option<Resolution>, S::Error> {
    let variant = self
      .store
      .get_variant(assignment.variant_id)
      .await
      .map_err(EngineError::Store)?;
    Ok(variant.map(|variant| Resolution { variant, assignment, created }))
  }
}

enum Attempt {
  Resolved(Resolution),
  NoVariant,
  Retry,
}
