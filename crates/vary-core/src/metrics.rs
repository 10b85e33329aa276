//! Read-side counters rolled up per variant.
//!
//! The store bumps each counter in the same transaction as the state change
//! it counts, so a counter moves at most once per assignment. The numbers are
//! advisory: nothing in selection reads them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Running totals kept on every variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantCounters {
  /// Identities bound to the variant (traffic).
  pub assignments: u64,
  pub exposures:   u64,
  pub conversions: u64,
}

impl VariantCounters {
  /// Conversions per assignment, `0.0` before any traffic.
  pub fn conversion_rate(&self) -> f64 {
    if self.assignments == 0 {
      0.0
    } else {
      self.conversions as f64 / self.assignments as f64
    }
  }
}

/// One row of a parent's metrics report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantMetrics {
  pub variant_id:      Uuid,
  pub name:            String,
  pub is_control:      bool,
  #[serde(flatten)]
  pub counters:        VariantCounters,
  pub conversion_rate: f64,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn conversion_rate_handles_empty_variant() {
    assert_eq!(VariantCounters::default().conversion_rate(), 0.0);
  }

  #[test]
  fn conversion_rate_is_per_assignment() {
    let c = VariantCounters { assignments: 8, exposures: 6, conversions: 2 };
    assert!((c.conversion_rate() - 0.25).abs() < f64::EPSILON);
  }
}
