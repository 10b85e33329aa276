//! Synchronous SQL helpers shared by the async store methods.
//!
//! Every function takes a plain [`rusqlite::Connection`] (a transaction
//! derefs to one) so the same statements serve both the single-statement
//! paths and the strict, transactional assignment path.

use std::os::raw::c_int;

use rusqlite::{OptionalExtension as _, ffi};

use crate::encode::{
  ASSIGNMENT_COLUMNS, RULE_COLUMNS, RawAssignment, RawRule, RawVariant, VARIANT_COLUMNS,
};

/// Whether `err` is a constraint failure with one of the given extended codes.
pub fn is_constraint(err: &rusqlite::Error, codes: &[c_int]) -> bool {
  matches!(
    err,
    rusqlite::Error::SqliteFailure(e, _)
      if e.code == rusqlite::ErrorCode::ConstraintViolation && codes.contains(&e.extended_code)
  )
}

/// A losing insert: the identity is already bound, or the variant is gone.
pub fn is_assignment_conflict(err: &rusqlite::Error) -> bool {
  is_constraint(err, &[
    ffi::SQLITE_CONSTRAINT_UNIQUE,
    ffi::SQLITE_CONSTRAINT_PRIMARYKEY,
    ffi::SQLITE_CONSTRAINT_FOREIGNKEY,
  ])
}

// ─── Variants ─────────────────────────────────────────────────────────────────

pub fn variant(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<Option<RawVariant>> {
  conn
    .query_row(
      &format!("SELECT {VARIANT_COLUMNS} FROM variants WHERE variant_id = ?1"),
      rusqlite::params![id],
      RawVariant::from_row,
    )
    .optional()
}

pub fn variants(
  conn: &rusqlite::Connection,
  parent_kind: &str,
  parent_id: &str,
) -> rusqlite::Result<Vec<RawVariant>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {VARIANT_COLUMNS} FROM variants
     WHERE parent_kind = ?1 AND parent_id = ?2
     ORDER BY created_at, rowid"
  ))?;
  stmt
    .query_map(rusqlite::params![parent_kind, parent_id], RawVariant::from_row)?
    .collect()
}

/// Clear the control flag on every variant of the parent except `keep`.
pub fn clear_other_controls(
  conn: &rusqlite::Connection,
  parent_kind: &str,
  parent_id: &str,
  keep: &str,
) -> rusqlite::Result<usize> {
  conn.execute(
    "UPDATE variants SET is_control = 0
     WHERE parent_kind = ?1 AND parent_id = ?2 AND variant_id != ?3 AND is_control = 1",
    rusqlite::params![parent_kind, parent_id, keep],
  )
}

// ─── Rules ────────────────────────────────────────────────────────────────────

pub fn rule(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<Option<RawRule>> {
  conn
    .query_row(
      &format!("SELECT {RULE_COLUMNS} FROM rules WHERE rule_id = ?1"),
      rusqlite::params![id],
      RawRule::from_row,
    )
    .optional()
}

pub fn rules_for_variant(
  conn: &rusqlite::Connection,
  variant_id: &str,
) -> rusqlite::Result<Vec<RawRule>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {RULE_COLUMNS} FROM rules WHERE variant_id = ?1 ORDER BY created_at, rowid"
  ))?;
  stmt.query_map(rusqlite::params![variant_id], RawRule::from_row)?.collect()
}

/// Rules for one bucket across all of a parent's variants, oldest first.
pub fn rules_for_bucket(
  conn: &rusqlite::Connection,
  parent_kind: &str,
  parent_id: &str,
  bucket_id: &str,
) -> rusqlite::Result<Vec<RawRule>> {
  let mut stmt = conn.prepare(
    "SELECT r.rule_id, r.variant_id, r.bucket_id, r.distribution_type,
            r.distribution_value, r.created_at
     FROM rules r
     JOIN variants v ON v.variant_id = r.variant_id
     WHERE v.parent_kind = ?1 AND v.parent_id = ?2 AND r.bucket_id = ?3
     ORDER BY r.created_at, r.rowid",
  )?;
  stmt
    .query_map(rusqlite::params![parent_kind, parent_id, bucket_id], RawRule::from_row)?
    .collect()
}

// ─── Assignments ──────────────────────────────────────────────────────────────

pub fn assignment(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<Option<RawAssignment>> {
  conn
    .query_row(
      &format!("SELECT {ASSIGNMENT_COLUMNS} FROM assignments WHERE assignment_id = ?1"),
      rusqlite::params![id],
      RawAssignment::from_row,
    )
    .optional()
}

/// The binding for one identity column value under a parent.
///
/// `column` is one of the fixed identity column names, never user input.
pub fn assignment_for_identity(
  conn: &rusqlite::Connection,
  parent_kind: &str,
  parent_id: &str,
  column: &str,
  value: &str,
) -> rusqlite::Result<Option<RawAssignment>> {
  conn
    .query_row(
      &format!(
        "SELECT {ASSIGNMENT_COLUMNS} FROM assignments
         WHERE parent_kind = ?1 AND parent_id = ?2 AND {column} = ?3"
      ),
      rusqlite::params![parent_kind, parent_id, value],
      RawAssignment::from_row,
    )
    .optional()
}

pub fn assignments_for_variant(
  conn: &rusqlite::Connection,
  variant_id: &str,
) -> rusqlite::Result<Vec<RawAssignment>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {ASSIGNMENT_COLUMNS} FROM assignments
     WHERE variant_id = ?1 ORDER BY assigned_at, rowid"
  ))?;
  stmt.query_map(rusqlite::params![variant_id], RawAssignment::from_row)?.collect()
}

/// `(variant_id, count)` pairs for one bucket of a parent.
pub fn bucket_counts(
  conn: &rusqlite::Connection,
  parent_kind: &str,
  parent_id: &str,
  bucket_id: &str,
) -> rusqlite::Result<Vec<(String, i64)>> {
  let mut stmt = conn.prepare(
    "SELECT variant_id, COUNT(*) FROM assignments
     WHERE parent_kind = ?1 AND parent_id = ?2 AND bucket_id = ?3
     GROUP BY variant_id",
  )?;
  stmt
    .query_map(rusqlite::params![parent_kind, parent_id, bucket_id], |row| {
      Ok((row.get(0)?, row.get(1)?))
    })?
    .collect()
}

/// Values for one new `assignments` row.
pub struct AssignmentRow {
  pub assignment_id:   String,
  pub variant_id:      String,
  pub parent_kind:     &'static str,
  pub parent_id:       String,
  pub bucket_id:       Option<String>,
  pub subscription_id: Option<String>,
  pub user_id:         Option<String>,
  pub buyer_cookie:    Option<String>,
  pub assigned_at:     String,
}

/// Insert a binding and bump the variant's traffic counter.
///
/// The row is only inserted if the variant still belongs to the parent;
/// returns `false` if it does not. Constraint errors are passed through for
/// the caller to classify. Must run inside a transaction so the counter
/// moves with the row.
pub fn insert_assignment(conn: &rusqlite::Connection, row: &AssignmentRow) -> rusqlite::Result<bool> {
  let inserted = conn.execute(
    "INSERT INTO assignments (
       assignment_id, variant_id, parent_kind, parent_id, bucket_id,
       subscription_id, user_id, buyer_cookie, assigned_at
     )
     SELECT ?1, variant_id, parent_kind, parent_id, ?4, ?5, ?6, ?7, ?8
     FROM variants
     WHERE variant_id = ?2 AND parent_kind = ?3 AND parent_id = ?9",
    rusqlite::params![
      row.assignment_id,
      row.variant_id,
      row.parent_kind,
      row.bucket_id,
      row.subscription_id,
      row.user_id,
      row.buyer_cookie,
      row.assigned_at,
      row.parent_id,
    ],
  )?;
  if inserted == 0 {
    return Ok(false);
  }
  conn.execute(
    "UPDATE variants SET assignment_count = assignment_count + 1 WHERE variant_id = ?1",
    rusqlite::params![row.variant_id],
  )?;
  Ok(true)
}
