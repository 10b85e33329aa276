//! Distribution rules: how a post variant's traffic is allocated within a
//! bucket (subscription tier).
//!
//! At most one rule exists per (variant, bucket). The four policies are
//! modelled as a sum type so an invalid combination of type and value can
//! only exist on the wire, never in memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{Error, Result};

/// The policy discriminant, as stored and as sent by clients.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  AsRefStr,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DistributionType {
  Percentage,
  Count,
  Unlimited,
  Random,
}

/// A validated distribution policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DistributionParts", into = "DistributionParts")]
pub enum Distribution {
  /// Up to this share (1..=100) of the bucket's assignments.
  Percentage(u32),
  /// Up to this many assignments in the bucket.
  Count(u32),
  Unlimited,
  Random,
}

/// Wire form: `{"distribution_type": "...", "distribution_value": n}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionParts {
  pub distribution_type:  DistributionType,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub distribution_value: Option<u32>,
}

impl Distribution {
  /// Build a policy from its type and optional value, rejecting anything a
  /// rule may not be saved with.
  pub fn from_parts(kind: DistributionType, value: Option<u32>) -> Result<Self> {
    match (kind, value) {
      (DistributionType::Percentage, None) => Err(Error::MissingDistributionValue("percentage")),
      (DistributionType::Percentage, Some(v)) if !(1..=100).contains(&v) => {
        Err(Error::PercentageOutOfRange(v))
      }
      (DistributionType::Percentage, Some(v)) => Ok(Self::Percentage(v)),
      (DistributionType::Count, None) => Err(Error::MissingDistributionValue("count")),
      (DistributionType::Count, Some(0)) => Err(Error::ZeroCount),
      (DistributionType::Count, Some(v)) => Ok(Self::Count(v)),
      (DistributionType::Unlimited, Some(_)) => Err(Error::UnexpectedDistributionValue("unlimited")),
      (DistributionType::Unlimited, None) => Ok(Self::Unlimited),
      (DistributionType::Random, Some(_)) => Err(Error::UnexpectedDistributionValue("random")),
      (DistributionType::Random, None) => Ok(Self::Random),
    }
  }

  pub fn kind(&self) -> DistributionType {
    match self {
      Self::Percentage(_) => DistributionType::Percentage,
      Self::Count(_) => DistributionType::Count,
      Self::Unlimited => DistributionType::Unlimited,
      Self::Random => DistributionType::Random,
    }
  }

  pub fn value(&self) -> Option<u32> {
    match self {
      Self::Percentage(v) | Self::Count(v) => Some(*v),
      Self::Unlimited | Self::Random => None,
    }
  }

  /// Percentage and count rules have a hard capacity; the others do not.
  pub fn is_limited(&self) -> bool { matches!(self, Self::Percentage(_) | Self::Count(_)) }

  /// Whether one more identity may be assigned to the rule's variant.
  ///
  /// `current` is the variant's assignment count within the bucket, `total`
  /// the bucket's assignment count across all variants of the parent. A
  /// percentage rule always admits at least one assignment, so a low share
  /// on an empty bucket still gets traffic.
  pub fn slots_available(&self, current: u64, total: u64) -> bool {
    match *self {
      Self::Unlimited | Self::Random => true,
      Self::Count(limit) => current < u64::from(limit),
      Self::Percentage(pct) => {
        let cap = (total * u64::from(pct)).div_ceil(100).max(1);
        current < cap
      }
    }
  }
}

impl TryFrom<DistributionParts> for Distribution {
  type Error = Error;

  fn try_from(parts: DistributionParts) -> Result<Self> {
    Self::from_parts(parts.distribution_type, parts.distribution_value)
  }
}

impl From<Distribution> for DistributionParts {
  fn from(d: Distribution) -> Self {
    Self { distribution_type: d.kind(), distribution_value: d.value() }
  }
}

/// A persisted rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionRule {
  pub rule_id:      Uuid,
  pub variant_id:   Uuid,
  /// The tier this rule allocates traffic within.
  pub bucket_id:    Uuid,
  #[serde(flatten)]
  pub distribution: Distribution,
  pub created_at:   DateTime<Utc>,
}

/// Input for creating a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRule {
  pub variant_id:   Uuid,
  pub bucket_id:    Uuid,
  #[serde(flatten)]
  pub distribution: Distribution,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn limited_iff_percentage_or_count() {
    assert!(Distribution::Percentage(10).is_limited());
    assert!(Distribution::Count(3).is_limited());
    assert!(!Distribution::Unlimited.is_limited());
    assert!(!Distribution::Random.is_limited());
  }

  #[test]
  fn unlimited_and_random_always_have_room() {
    for d in [Distribution::Unlimited, Distribution::Random] {
      assert!(d.slots_available(0, 0));
      assert!(d.slots_available(1_000_000, 1_000_000));
    }
  }

  #[test]
  fn count_caps_at_value() {
    let d = Distribution::Count(5);
    assert!(d.slots_available(4, 100));
    assert!(!d.slots_available(5, 100));
  }

  #[test]
  fn percentage_rounds_up_with_floor_of_one() {
    let d = Distribution::Percentage(50);
    // Empty bucket still admits one.
    assert!(d.slots_available(0, 0));
    assert!(!d.slots_available(1, 0));
    // ceil(3 * 0.5) = 2
    assert!(d.slots_available(1, 3));
    assert!(!d.slots_available(2, 3));

    let small = Distribution::Percentage(1);
    // ceil(10 * 0.01) = 1
    assert!(small.slots_available(0, 10));
    assert!(!small.slots_available(1, 10));
    // ceil(101 * 0.01) = 2
    assert!(small.slots_available(1, 101));
  }

  #[test]
  fn from_parts_validates() {
    use DistributionType::*;
    assert!(matches!(
      Distribution::from_parts(Percentage, None),
      Err(Error::MissingDistributionValue(_))
    ));
    assert!(matches!(
      Distribution::from_parts(Percentage, Some(0)),
      Err(Error::PercentageOutOfRange(0))
    ));
    assert!(matches!(
      Distribution::from_parts(Percentage, Some(101)),
      Err(Error::PercentageOutOfRange(101))
    ));
    assert!(matches!(Distribution::from_parts(Count, Some(0)), Err(Error::ZeroCount)));
    assert!(matches!(
      Distribution::from_parts(Unlimited, Some(3)),
      Err(Error::UnexpectedDistributionValue(_))
    ));
    assert_eq!(Distribution::from_parts(Percentage, Some(100)).unwrap(), Distribution::Percentage(100));
    assert_eq!(Distribution::from_parts(Random, None).unwrap(), Distribution::Random);
  }

  #[test]
  fn rule_json_uses_flat_wire_form() {
    let json = r#"{
      "variant_id": "00000000-0000-0000-0000-000000000001",
      "bucket_id": "00000000-0000-0000-0000-000000000002",
      "distribution_type": "count",
      "distribution_value": 5
    }"#;
    let rule: NewRule = serde_json::from_str(json).unwrap();
    assert_eq!(rule.distribution, Distribution::Count(5));

    let bad = json.replace("\"count\"", "\"unlimited\"");
    assert!(serde_json::from_str::<NewRule>(&bad).is_err());
  }
}
