//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microseconds, `Z`)
//! so that lexical order is chronological. UUIDs are stored as hyphenated
//! lowercase strings. Enums use their snake_case names.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;
use vary_core::{
  assignment::Assignment,
  identity::Identity,
  metrics::VariantCounters,
  parent::{ParentKind, ParentRef},
  rule::{Distribution, DistributionRule, DistributionType},
  variant::Variant,
};

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

fn decode_opt_uuid(s: Option<&str>) -> Result<Option<Uuid>> {
  s.map(decode_uuid).transpose()
}

// ─── DateTime<Utc> ────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<&str>) -> Result<Option<DateTime<Utc>>> {
  s.map(decode_dt).transpose()
}

// ─── Enums ────────────────────────────────────────────────────────────────────

pub fn encode_parent_kind(k: ParentKind) -> &'static str {
  match k {
    ParentKind::Post => "post",
    ParentKind::Experiment => "experiment",
  }
}

pub fn decode_parent_kind(s: &str) -> Result<ParentKind> {
  ParentKind::from_str(s).map_err(|_| Error::Corrupt(format!("unknown parent kind: {s:?}")))
}

fn decode_distribution(kind: &str, value: Option<i64>) -> Result<Distribution> {
  let kind = DistributionType::from_str(kind)
    .map_err(|_| Error::Corrupt(format!("unknown distribution type: {kind:?}")))?;
  let value = value
    .map(u32::try_from)
    .transpose()
    .map_err(|_| Error::Corrupt(format!("distribution value out of range: {value:?}")))?;
  Ok(Distribution::from_parts(kind, value)?)
}

fn decode_counter(n: i64) -> u64 { u64::try_from(n).unwrap_or(0) }

// ─── Identity ─────────────────────────────────────────────────────────────────

/// The three identity columns of an `assignments` row; exactly one is set.
pub struct IdentityColumns {
  pub subscription_id: Option<String>,
  pub user_id:         Option<String>,
  pub buyer_cookie:    Option<String>,
}

pub fn encode_identity(identity: &Identity) -> IdentityColumns {
  let mut cols = IdentityColumns { subscription_id: None, user_id: None, buyer_cookie: None };
  match identity {
    Identity::Subscription(id) => cols.subscription_id = Some(encode_uuid(*id)),
    Identity::User(id) => cols.user_id = Some(encode_uuid(*id)),
    Identity::BuyerCookie(token) => cols.buyer_cookie = Some(token.clone()),
  }
  cols
}

/// The column an identity lives in, for building lookups.
pub fn identity_column(identity: &Identity) -> (&'static str, String) {
  match identity {
    Identity::Subscription(id) => ("subscription_id", encode_uuid(*id)),
    Identity::User(id) => ("user_id", encode_uuid(*id)),
    Identity::BuyerCookie(token) => ("buyer_cookie", token.clone()),
  }
}

fn decode_identity(cols: IdentityColumns) -> Result<Identity> {
  match (cols.subscription_id, cols.user_id, cols.buyer_cookie) {
    (Some(s), None, None) => Ok(Identity::Subscription(decode_uuid(&s)?)),
    (None, Some(u), None) => Ok(Identity::User(decode_uuid(&u)?)),
    (None, None, Some(c)) => Ok(Identity::BuyerCookie(c)),
    _ => Err(Error::Corrupt("assignment must carry exactly one identity".into())),
  }
}

// ─── Row types ────────────────────────────────────────────────────────────────

pub const VARIANT_COLUMNS: &str = "variant_id, parent_kind, parent_id, name, content, \
   is_control, price_cents, weight, created_at, \
   assignment_count, exposure_count, conversion_count";

/// Raw values read directly from a `variants` row.
pub struct RawVariant {
  pub variant_id:       String,
  pub parent_kind:      String,
  pub parent_id:        String,
  pub name:             String,
  pub content:          String,
  pub is_control:       bool,
  pub price_cents:      Option<i64>,
  pub weight:           i64,
  pub created_at:       String,
  pub assignment_count: i64,
  pub exposure_count:   i64,
  pub conversion_count: i64,
}

impl RawVariant {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      variant_id:       row.get(0)?,
      parent_kind:      row.get(1)?,
      parent_id:        row.get(2)?,
      name:             row.get(3)?,
      content:          row.get(4)?,
      is_control:       row.get(5)?,
      price_cents:      row.get(6)?,
      weight:           row.get(7)?,
      created_at:       row.get(8)?,
      assignment_count: row.get(9)?,
      exposure_count:   row.get(10)?,
      conversion_count: row.get(11)?,
    })
  }

  pub fn into_variant(self) -> Result<Variant> {
    Ok(Variant {
      variant_id:  decode_uuid(&self.variant_id)?,
      parent:      ParentRef {
        kind: decode_parent_kind(&self.parent_kind)?,
        id:   decode_uuid(&self.parent_id)?,
      },
      name:        self.name,
      content:     self.content,
      is_control:  self.is_control,
      price_cents: self.price_cents,
      weight:      u32::try_from(self.weight)
        .map_err(|_| Error::Corrupt(format!("weight out of range: {}", self.weight)))?,
      created_at:  decode_dt(&self.created_at)?,
      counters:    VariantCounters {
        assignments: decode_counter(self.assignment_count),
        exposures:   decode_counter(self.exposure_count),
        conversions: decode_counter(self.conversion_count),
      },
    })
  }
}

pub const RULE_COLUMNS: &str =
  "rule_id, variant_id, bucket_id, distribution_type, distribution_value, created_at";

/// Raw values read directly from a `rules` row.
pub struct RawRule {
  pub rule_id:            String,
  pub variant_id:         String,
  pub bucket_id:          String,
  pub distribution_type:  String,
  pub distribution_value: Option<i64>,
  pub created_at:         String,
}

impl RawRule {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      rule_id:            row.get(0)?,
      variant_id:         row.get(1)?,
      bucket_id:          row.get(2)?,
      distribution_type:  row.get(3)?,
      distribution_value: row.get(4)?,
      created_at:         row.get(5)?,
    })
  }

  pub fn into_rule(self) -> Result<DistributionRule> {
    Ok(DistributionRule {
      rule_id:      decode_uuid(&self.rule_id)?,
      variant_id:   decode_uuid(&self.variant_id)?,
      bucket_id:    decode_uuid(&self.bucket_id)?,
      distribution: decode_distribution(&self.distribution_type, self.distribution_value)?,
      created_at:   decode_dt(&self.created_at)?,
    })
  }
}

pub const ASSIGNMENT_COLUMNS: &str = "assignment_id, variant_id, parent_kind, parent_id, \
   bucket_id, subscription_id, user_id, buyer_cookie, \
   assigned_at, exposed_at, converted_at, purchase_id";

/// Raw values read directly from an `assignments` row.
pub struct RawAssignment {
  pub assignment_id: String,
  pub variant_id:    String,
  pub parent_kind:   String,
  pub parent_id:     String,
  pub bucket_id:     Option<String>,
  pub identity:      IdentityColumns,
  pub assigned_at:   String,
  pub exposed_at:    Option<String>,
  pub converted_at:  Option<String>,
  pub purchase_id:   Option<String>,
}

impl RawAssignment {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      assignment_id: row.get(0)?,
      variant_id:    row.get(1)?,
      parent_kind:   row.get(2)?,
      parent_id:     row.get(3)?,
      bucket_id:     row.get(4)?,
      identity:      IdentityColumns {
        subscription_id: row.get(5)?,
        user_id:         row.get(6)?,
        buyer_cookie:    row.get(7)?,
      },
      assigned_at:   row.get(8)?,
      exposed_at:    row.get(9)?,
      converted_at:  row.get(10)?,
      purchase_id:   row.get(11)?,
    })
  }

  pub fn into_assignment(self) -> Result<Assignment> {
    Ok(Assignment {
      assignment_id: decode_uuid(&self.assignment_id)?,
      variant_id:    decode_uuid(&self.variant_id)?,
      parent:        ParentRef {
        kind: decode_parent_kind(&self.parent_kind)?,
        id:   decode_uuid(&self.parent_id)?,
      },
      bucket_id:     decode_opt_uuid(self.bucket_id.as_deref())?,
      identity:      decode_identity(self.identity)?,
      assigned_at:   decode_dt(&self.assigned_at)?,
      exposed_at:    decode_opt_dt(self.exposed_at.as_deref())?,
      converted_at:  decode_opt_dt(self.converted_at.as_deref())?,
      purchase_id:   decode_opt_uuid(self.purchase_id.as_deref())?,
    })
  }
}
