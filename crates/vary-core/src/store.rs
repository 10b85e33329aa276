//! The `VariantStore` trait.
//!
//! The trait is implemented by storage backends (e.g. `vary-store-sqlite`).
//! The [`Engine`](crate::engine::Engine) and the HTTP layer depend on this
//! abstraction, not on any concrete backend.
//!
//! The store is the single source of truth for "one assignment per identity
//! per parent": backends must enforce it with uniqueness constraints and
//! report a losing insert as [`Insert::Conflict`] rather than as an error.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  assignment::{Assignment, Insert, NewAssignment, Recorded},
  identity::Identity,
  parent::ParentRef,
  rule::{Distribution, DistributionRule, NewRule},
  select::SelectionInput,
  variant::{NewVariant, Variant, VariantPatch},
};

/// Picks a variant id from a snapshot taken inside a store transaction.
pub type Chooser = Box<dyn FnOnce(&SelectionInput) -> Option<Uuid> + Send + 'static>;

/// Outcome of [`VariantStore::assign_exclusive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
  /// The identity was already bound.
  Existing(Assignment),
  Created(Assignment),
  /// The parent has no variants to choose from.
  NoVariant,
}

/// Coarse classification of a backend error, used to choose HTTP statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
  /// Input failed validation.
  Invalid,
  NotFound,
  /// Input clashed with existing data (e.g. a duplicate rule).
  Conflict,
  Internal,
}

/// Backend errors expose an [`ErrorClass`] so callers can react without
/// knowing the concrete backend.
pub trait StoreError: std::error::Error + Send + Sync + 'static {
  fn class(&self) -> ErrorClass;
}

/// Abstraction over a variant/assignment store backend.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait VariantStore: Send + Sync {
  type Error: StoreError;

  // ── Variants ──────────────────────────────────────────────────────────

  /// Validate and persist a new variant. Marking it as control clears the
  /// flag on the parent's other variants in the same transaction.
  fn create_variant(
    &self,
    input: NewVariant,
  ) -> impl Future<Output = Result<Variant, Self::Error>> + Send + '_;

  /// Apply a partial update, with the same control-flag handling as create.
  fn update_variant(
    &self,
    id: Uuid,
    patch: VariantPatch,
  ) -> impl Future<Output = Result<Variant, Self::Error>> + Send + '_;

  /// Delete a variant together with its rules and assignments. Returns
  /// `false` if it did not exist.
  fn delete_variant(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn get_variant(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Variant>, Self::Error>> + Send + '_;

  /// A parent's variants in creation order.
  fn list_variants(
    &self,
    parent: ParentRef,
  ) -> impl Future<Output = Result<Vec<Variant>, Self::Error>> + Send + '_;

  // ── Rules ─────────────────────────────────────────────────────────────

  /// Persist a rule. Fails if the variant is missing, is not a post
  /// variant, or already has a rule for the bucket.
  fn create_rule(
    &self,
    input: NewRule,
  ) -> impl Future<Output = Result<DistributionRule, Self::Error>> + Send + '_;

  fn update_rule(
    &self,
    id: Uuid,
    distribution: Distribution,
  ) -> impl Future<Output = Result<DistributionRule, Self::Error>> + Send + '_;

  fn delete_rule(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Rules attached to one variant, in creation order.
  fn list_rules(
    &self,
    variant_id: Uuid,
  ) -> impl Future<Output = Result<Vec<DistributionRule>, Self::Error>> + Send + '_;

  // ── Selection ─────────────────────────────────────────────────────────

  /// Snapshot the parent's variants plus, for posts with a bucket, the
  /// bucket's rules and assignment counts.
  fn selection_input(
    &self,
    parent: ParentRef,
    bucket_id: Option<Uuid>,
  ) -> impl Future<Output = Result<SelectionInput, Self::Error>> + Send + '_;

  // ── Assignments ───────────────────────────────────────────────────────

  /// The identity's assignment among the parent's variants, if any.
  fn find_assignment<'a>(
    &'a self,
    parent: ParentRef,
    identity: &'a Identity,
  ) -> impl Future<Output = Result<Option<Assignment>, Self::Error>> + Send + 'a;

  fn get_assignment(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Assignment>, Self::Error>> + Send + '_;

  /// Insert a new binding and bump the variant's assignment counter.
  /// A constraint rejection is `Ok(Insert::Conflict)`.
  fn insert_assignment(
    &self,
    input: NewAssignment,
  ) -> impl Future<Output = Result<Insert<Assignment>, Self::Error>> + Send + '_;

  /// Lookup, snapshot, choose and insert inside one write transaction, so
  /// capacity counts cannot go stale between the decision and the insert.
  fn assign_exclusive(
    &self,
    parent: ParentRef,
    bucket_id: Option<Uuid>,
    identity: Identity,
    choose: Chooser,
  ) -> impl Future<Output = Result<Claim, Self::Error>> + Send + '_;

  /// Bindings to one variant, oldest first.
  fn list_assignments(
    &self,
    variant_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Assignment>, Self::Error>> + Send + '_;

  /// Set `exposed_at` if unset and bump the variant's exposure counter.
  /// Returns `Ok(None)` for an unknown assignment.
  fn record_exposure(
    &self,
    id: Uuid,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<Recorded>, Self::Error>> + Send + '_;

  /// Set `converted_at` and `purchase_id` if unset and bump the variant's
  /// conversion counter. Returns `Ok(None)` for an unknown assignment.
  fn record_conversion(
    &self,
    id: Uuid,
    purchase_id: Uuid,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<Recorded>, Self::Error>> + Send + '_;
}
