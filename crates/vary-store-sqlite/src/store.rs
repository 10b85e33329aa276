//! [`SqliteStore`]: the SQLite implementation of [`VariantStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::TransactionBehavior;
use tracing::debug;
use uuid::Uuid;

use vary_core::{
  assignment::{Assignment, Insert, NewAssignment, Recorded},
  identity::Identity,
  parent::{ParentKind, ParentRef},
  rule::{Distribution, DistributionRule, NewRule},
  select::{BucketCounts, SelectionInput},
  store::{Chooser, Claim, VariantStore},
  variant::{NewVariant, Variant, VariantPatch},
};

use crate::{
  Error, Result,
  encode::{
    RawAssignment, RawRule, RawVariant, decode_uuid, encode_dt, encode_identity,
    encode_parent_kind, encode_uuid, identity_column,
  },
  query::{self, AssignmentRow},
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A variant store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, mostly for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Write a full variant row, clearing other control flags in the same
  /// transaction when this one is control.
  async fn write_variant(&self, variant: &Variant, insert: bool) -> Result<()> {
    let id_str      = encode_uuid(variant.variant_id);
    let kind_str    = encode_parent_kind(variant.parent.kind);
    let parent_str  = encode_uuid(variant.parent.id);
    let name        = variant.name.clone();
    let content     = variant.content.clone();
    let is_control  = variant.is_control;
    let price_cents = variant.price_cents;
    let weight      = i64::from(variant.weight);
    let created_str = encode_dt(variant.created_at);

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if is_control {
          query::clear_other_controls(&tx, kind_str, &parent_str, &id_str)?;
        }
        if insert {
          tx.execute(
            "INSERT INTO variants (
               variant_id, parent_kind, parent_id, name, content,
               is_control, price_cents, weight, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
              id_str, kind_str, parent_str, name, content,
              is_control, price_cents, weight, created_str,
            ],
          )?;
        } else {
          tx.execute(
            "UPDATE variants
             SET name = ?2, content = ?3, is_control = ?4, price_cents = ?5, weight = ?6
             WHERE variant_id = ?1",
            rusqlite::params![id_str, name, content, is_control, price_cents, weight],
          )?;
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn fetch_rule(&self, id: Uuid) -> Result<Option<DistributionRule>> {
    let id_str = encode_uuid(id);
    let raw = self.conn.call(move |conn| Ok(query::rule(conn, &id_str)?)).await?;
    raw.map(RawRule::into_rule).transpose()
  }

  /// Shared body of the two first-write-wins timestamp updates.
  async fn record_once(
    &self,
    id: Uuid,
    set_sql: &'static str,
    counter_sql: &'static str,
    params: Vec<Option<String>>,
  ) -> Result<Option<Recorded>> {
    let id_str = encode_uuid(id);

    let outcome: Option<(bool, RawAssignment)> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut bound: Vec<&dyn rusqlite::ToSql> = vec![&id_str];
        bound.extend(params.iter().map(|p| p as &dyn rusqlite::ToSql));
        let changed = tx.execute(set_sql, bound.as_slice())?;
        if changed == 1 {
          tx.execute(counter_sql, rusqlite::params![id_str])?;
        }
        let raw = query::assignment(&tx, &id_str)?;
        tx.commit()?;
        Ok(raw.map(|raw| (changed == 1, raw)))
      })
      .await?;

    outcome
      .map(|(first, raw)| {
        let assignment = raw.into_assignment()?;
        Ok(if first { Recorded::First(assignment) } else { Recorded::Already(assignment) })
      })
      .transpose()
  }
}

/// Snapshot the data a selection needs. Runs on the database thread.
fn load_selection_input(
  conn: &rusqlite::Connection,
  parent: ParentRef,
  bucket_id: Option<Uuid>,
) -> Result<SelectionInput> {
  let kind_str = encode_parent_kind(parent.kind);
  let parent_str = encode_uuid(parent.id);

  let variants = query::variants(conn, kind_str, &parent_str)
    .map_err(db_error)?
    .into_iter()
    .map(RawVariant::into_variant)
    .collect::<Result<Vec<_>>>()?;

  let (rules, counts) = match (parent.kind, bucket_id) {
    (ParentKind::Post, Some(bucket_id)) => {
      let bucket_str = encode_uuid(bucket_id);
      let rules = query::rules_for_bucket(conn, kind_str, &parent_str, &bucket_str)
        .map_err(db_error)?
        .into_iter()
        .map(RawRule::into_rule)
        .collect::<Result<Vec<_>>>()?;
      let mut counts = BucketCounts::default();
      for (variant_id, n) in
        query::bucket_counts(conn, kind_str, &parent_str, &bucket_str).map_err(db_error)?
      {
        let n = u64::try_from(n).unwrap_or(0);
        counts.per_variant.insert(decode_uuid(&variant_id)?, n);
        counts.total += n;
      }
      (rules, counts)
    }
    _ => (Vec::new(), BucketCounts::default()),
  };

  Ok(SelectionInput { parent, variants, rules, counts })
}

fn db_error(e: rusqlite::Error) -> Error { Error::Database(e.into()) }

fn assignment_row(input: &NewAssignment) -> AssignmentRow {
  let identity = encode_identity(&input.identity);
  AssignmentRow {
    assignment_id:   encode_uuid(Uuid::new_v4()),
    variant_id:      encode_uuid(input.variant_id),
    parent_kind:     encode_parent_kind(input.parent.kind),
    parent_id:       encode_uuid(input.parent.id),
    bucket_id:       input.bucket_id.map(encode_uuid),
    subscription_id: identity.subscription_id,
    user_id:         identity.user_id,
    buyer_cookie:    identity.buyer_cookie,
    assigned_at:     encode_dt(Utc::now()),
  }
}

// ─── VariantStore impl ────────────────────────────────────────────────────────

impl VariantStore for SqliteStore {
  type Error = Error;

  // ── Variants ──────────────────────────────────────────────────────────────

  async fn create_variant(&self, input: NewVariant) -> Result<Variant> {
    let input = input.validate()?;
    let variant = Variant {
      variant_id:  Uuid::new_v4(),
      parent:      input.parent,
      weight:      input.effective_weight(),
      name:        input.name,
      content:     input.content,
      is_control:  input.is_control,
      price_cents: input.price_cents,
      created_at:  Utc::now(),
      counters:    Default::default(),
    };
    self.write_variant(&variant, true).await?;
    debug!(variant = %variant.variant_id, parent = %variant.parent.id, "variant created");
    Ok(variant)
  }

  async fn update_variant(&self, id: Uuid, patch: VariantPatch) -> Result<Variant> {
    let current = self.get_variant(id).await?.ok_or(Error::VariantNotFound(id))?;
    let next = patch.apply(&current)?;
    self.write_variant(&next, false).await?;
    // Re-read so counters reflect any traffic since `current` was loaded.
    self.get_variant(id).await?.ok_or(Error::VariantNotFound(id))
  }

  async fn delete_variant(&self, id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(id);
    let deleted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute("DELETE FROM variants WHERE variant_id = ?1", rusqlite::params![id_str])?)
      })
      .await?;
    if deleted > 0 {
      debug!(variant = %id, "variant deleted with its rules and assignments");
    }
    Ok(deleted > 0)
  }

  async fn get_variant(&self, id: Uuid) -> Result<Option<Variant>> {
    let id_str = encode_uuid(id);
    let raw = self.conn.call(move |conn| Ok(query::variant(conn, &id_str)?)).await?;
    raw.map(RawVariant::into_variant).transpose()
  }

  async fn list_variants(&self, parent: ParentRef) -> Result<Vec<Variant>> {
    let kind_str = encode_parent_kind(parent.kind);
    let parent_str = encode_uuid(parent.id);
    let raws = self
      .conn
      .call(move |conn| Ok(query::variants(conn, kind_str, &parent_str)?))
      .await?;
    raws.into_iter().map(RawVariant::into_variant).collect()
  }

  // ── Rules ─────────────────────────────────────────────────────────────────

  async fn create_rule(&self, input: NewRule) -> Result<DistributionRule> {
    let variant = self
      .get_variant(input.variant_id)
      .await?
      .ok_or(Error::VariantNotFound(input.variant_id))?;
    if variant.parent.kind != ParentKind::Post {
      return Err(vary_core::Error::RuleOnNonPost(variant.parent.kind).into());
    }

    let rule = DistributionRule {
      rule_id:      Uuid::new_v4(),
      variant_id:   input.variant_id,
      bucket_id:    input.bucket_id,
      distribution: input.distribution,
      created_at:   Utc::now(),
    };

    let rule_str    = encode_uuid(rule.rule_id);
    let variant_str = encode_uuid(rule.variant_id);
    let bucket_str  = encode_uuid(rule.bucket_id);
    let kind_str    = rule.distribution.kind().as_ref().to_owned();
    let value       = rule.distribution.value().map(i64::from);
    let at_str      = encode_dt(rule.created_at);

    let inserted = self
      .conn
      .call(move |conn| {
        let result = conn.execute(
          "INSERT INTO rules (
             rule_id, variant_id, bucket_id, distribution_type, distribution_value, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![rule_str, variant_str, bucket_str, kind_str, value, at_str],
        );
        match result {
          Ok(_) => Ok(true),
          Err(e) if query::is_constraint(&e, &[rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE]) => {
            Ok(false)
          }
          Err(e) => Err(e.into()),
        }
      })
      .await?;

    if !inserted {
      return Err(Error::DuplicateRule {
        variant_id: rule.variant_id,
        bucket_id:  rule.bucket_id,
      });
    }
    Ok(rule)
  }

  async fn update_rule(&self, id: Uuid, distribution: Distribution) -> Result<DistributionRule> {
    let id_str   = encode_uuid(id);
    let kind_str = distribution.kind().as_ref().to_owned();
    let value    = distribution.value().map(i64::from);

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE rules SET distribution_type = ?2, distribution_value = ?3 WHERE rule_id = ?1",
          rusqlite::params![id_str, kind_str, value],
        )?)
      })
      .await?;
    if changed == 0 {
      return Err(Error::RuleNotFound(id));
    }
    self.fetch_rule(id).await?.ok_or(Error::RuleNotFound(id))
  }

  async fn delete_rule(&self, id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(id);
    let deleted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute("DELETE FROM rules WHERE rule_id = ?1", rusqlite::params![id_str])?)
      })
      .await?;
    Ok(deleted > 0)
  }

  async fn list_rules(&self, variant_id: Uuid) -> Result<Vec<DistributionRule>> {
    let id_str = encode_uuid(variant_id);
    let raws = self
      .conn
      .call(move |conn| Ok(query::rules_for_variant(conn, &id_str)?))
      .await?;
    raws.into_iter().map(RawRule::into_rule).collect()
  }

  // ── Selection ─────────────────────────────────────────────────────────────

  async fn selection_input(
    &self,
    parent: ParentRef,
    bucket_id: Option<Uuid>,
  ) -> Result<SelectionInput> {
    self
      .conn
      .call(move |conn| {
        load_selection_input(conn, parent, bucket_id)
          .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))
      })
      .await
      .map_err(Error::from)
  }

  // ── Assignments ───────────────────────────────────────────────────────────

  async fn find_assignment<'a>(
    &'a self,
    parent: ParentRef,
    identity: &'a Identity,
  ) -> Result<Option<Assignment>> {
    let kind_str = encode_parent_kind(parent.kind);
    let parent_str = encode_uuid(parent.id);
    let (column, value) = identity_column(identity);

    let raw = self
      .conn
      .call(move |conn| {
        Ok(query::assignment_for_identity(conn, kind_str, &parent_str, column, &value)?)
      })
      .await?;
    raw.map(RawAssignment::into_assignment).transpose()
  }

  async fn get_assignment(&self, id: Uuid) -> Result<Option<Assignment>> {
    let id_str = encode_uuid(id);
    let raw = self.conn.call(move |conn| Ok(query::assignment(conn, &id_str)?)).await?;
    raw.map(RawAssignment::into_assignment).transpose()
  }

  async fn insert_assignment(&self, input: NewAssignment) -> Result<Insert<Assignment>> {
    let row = assignment_row(&input);
    let id_str = row.assignment_id.clone();

    let inserted = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        match query::insert_assignment(&tx, &row) {
          Ok(true) => {
            let raw = query::assignment(&tx, &row.assignment_id)?;
            tx.commit()?;
            Ok(raw)
          }
          Ok(false) => Ok(None),
          Err(e) if query::is_assignment_conflict(&e) => Ok(None),
          Err(e) => Err(e.into()),
        }
      })
      .await?;

    match inserted {
      Some(raw) => Ok(Insert::Created(raw.into_assignment()?)),
      None => {
        debug!(assignment = %id_str, "assignment insert rejected by constraints");
        Ok(Insert::Conflict)
      }
    }
  }

  async fn assign_exclusive(
    &self,
    parent: ParentRef,
    bucket_id: Option<Uuid>,
    identity: Identity,
    choose: Chooser,
  ) -> Result<Claim> {
    let kind_str = encode_parent_kind(parent.kind);
    let parent_str = encode_uuid(parent.id);

    let claim: Option<(bool, RawAssignment)> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (column, value) = identity_column(&identity);
        if let Some(raw) = query::assignment_for_identity(&tx, kind_str, &parent_str, column, &value)? {
          return Ok(Some((false, raw)));
        }

        let input = load_selection_input(&tx, parent, bucket_id)
          .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
        let Some(variant_id) = choose(&input) else {
          return Ok(None);
        };

        let row = assignment_row(&NewAssignment { variant_id, parent, bucket_id, identity });
        if !query::insert_assignment(&tx, &row)? {
          return Ok(None);
        }
        let raw = query::assignment(&tx, &row.assignment_id)?;
        tx.commit()?;
        Ok(raw.map(|raw| (true, raw)))
      })
      .await?;

    Ok(match claim {
      Some((false, raw)) => Claim::Existing(raw.into_assignment()?),
      Some((true, raw)) => Claim::Created(raw.into_assignment()?),
      None => Claim::NoVariant,
    })
  }

  async fn list_assignments(&self, variant_id: Uuid) -> Result<Vec<Assignment>> {
    let id_str = encode_uuid(variant_id);
    let raws = self
      .conn
      .call(move |conn| Ok(query::assignments_for_variant(conn, &id_str)?))
      .await?;
    raws.into_iter().map(RawAssignment::into_assignment).collect()
  }

  async fn record_exposure(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<Recorded>> {
    self
      .record_once(
        id,
        "UPDATE assignments SET exposed_at = ?2
         WHERE assignment_id = ?1 AND exposed_at IS NULL",
        "UPDATE variants SET exposure_count = exposure_count + 1
         WHERE variant_id = (SELECT variant_id FROM assignments WHERE assignment_id = ?1)",
        vec![Some(encode_dt(at))],
      )
      .await
  }

  async fn record_conversion(
    &self,
    id: Uuid,
    purchase_id: Uuid,
    at: DateTime<Utc>,
  ) -> Result<Option<Recorded>> {
    self
      .record_once(
        id,
        "UPDATE assignments SET converted_at = ?2, purchase_id = ?3
         WHERE assignment_id = ?1 AND converted_at IS NULL",
        "UPDATE variants SET conversion_count = conversion_count + 1
         WHERE variant_id = (SELECT variant_id FROM assignments WHERE assignment_id = ?1)",
        vec![Some(encode_dt(at)), Some(encode_uuid(purchase_id))],
      )
      .await
  }
}
