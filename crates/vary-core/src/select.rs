//! Variant selection algorithms.
//!
//! Two independent strategies, picked by parent kind:
//!
//! - [`select_by_rules`] for posts: capacity-aware, scoped to a bucket.
//! - [`select_weighted`] for experiments: a proportional draw by weight.
//!
//! Both are pure functions over a snapshot ([`SelectionInput`]) and take the
//! random source as a parameter so tests can seed it.

use std::collections::HashMap;

use rand::Rng;
use serde::Serialize;
use uuid::Uuid;

use crate::{
  parent::{ParentKind, ParentRef},
  rule::DistributionRule,
  variant::Variant,
};

// ─── Inputs ──────────────────────────────────────────────────────────────────

/// Existing assignment counts within one bucket of a parent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketCounts {
  pub per_variant: HashMap<Uuid, u64>,
  /// Assignments in the bucket across all of the parent's variants.
  pub total:       u64,
}

impl BucketCounts {
  pub fn for_variant(&self, variant_id: Uuid) -> u64 {
    self.per_variant.get(&variant_id).copied().unwrap_or(0)
  }

  /// Count one more assignment; used when simulating sequential traffic.
  pub fn bump(&mut self, variant_id: Uuid) {
    *self.per_variant.entry(variant_id).or_default() += 1;
    self.total += 1;
  }
}

/// Everything a selection needs, read from the store at decision time.
#[derive(Debug, Clone)]
pub struct SelectionInput {
  pub parent:   ParentRef,
  /// The parent's variants in creation order.
  pub variants: Vec<Variant>,
  /// Rules for the requested bucket; empty for experiments.
  pub rules:    Vec<DistributionRule>,
  pub counts:   BucketCounts,
}

// ─── Outputs ─────────────────────────────────────────────────────────────────

/// Why a variant was chosen. Logged, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SelectionReason {
  /// A percentage/count rule had room.
  Limited { rule_id: Uuid },
  /// Every limited rule was full; the control variant absorbs the rest.
  ControlOverflow,
  /// Uniform pick among unlimited/random rules.
  Unlimited { rule_id: Uuid },
  /// No applicable rule: control if present, else the oldest variant.
  Fallback,
  /// Proportional draw by weight.
  Weighted,
  /// Every weight was zero; the oldest variant wins.
  ZeroWeight,
}

#[derive(Debug, Clone, Copy)]
pub struct Selection<'a> {
  pub variant: &'a Variant,
  pub reason:  SelectionReason,
}

/// Dispatch on parent kind. `None` only when the parent has no variants.
pub fn choose<'a, R>(input: &'a SelectionInput, rng: &mut R) -> Option<Selection<'a>>
where
  R: Rng + ?Sized,
{
  match input.parent.kind {
    ParentKind::Post => select_by_rules(&input.variants, &input.rules, &input.counts, rng),
    ParentKind::Experiment => select_weighted(&input.variants, rng),
  }
}

// ─── Rule-based (posts) ──────────────────────────────────────────────────────

/// Pick a post variant for a new identity in a bucket.
///
/// Priority:
/// 1. the first limited rule (creation order, ties keep input order) whose
///    variant still has room;
/// 2. if limited rules exist but are all full, the control variant;
/// 3. a uniform pick among unlimited/random rules;
/// 4. the control variant, else the oldest variant.
///
/// Rules pointing at variants not in `variants` are ignored.
pub fn select_by_rules<'a, R>(
  variants: &'a [Variant],
  rules:    &[DistributionRule],
  counts:   &BucketCounts,
  rng:      &mut R,
) -> Option<Selection<'a>>
where
  R: Rng + ?Sized,
{
  let oldest = variants.first()?;
  let by_id: HashMap<Uuid, &Variant> = variants.iter().map(|v| (v.variant_id, v)).collect();
  let control = variants.iter().find(|v| v.is_control);

  let mut applicable: Vec<&DistributionRule> =
    rules.iter().filter(|r| by_id.contains_key(&r.variant_id)).collect();
  applicable.sort_by_key(|r| r.created_at);

  let (limited, open): (Vec<_>, Vec<_>) =
    applicable.into_iter().partition(|r| r.distribution.is_limited());

  for rule in &limited {
    let current = counts.for_variant(rule.variant_id);
    if rule.distribution.slots_available(current, counts.total) {
      return Some(Selection {
        variant: by_id[&rule.variant_id],
        reason:  SelectionReason::Limited { rule_id: rule.rule_id },
      });
    }
  }

  if !limited.is_empty()
    && let Some(control) = control
  {
    return Some(Selection { variant: control, reason: SelectionReason::ControlOverflow });
  }

  if !open.is_empty() {
    let rule = open[rng.gen_range(0..open.len())];
    return Some(Selection {
      variant: by_id[&rule.variant_id],
      reason:  SelectionReason::Unlimited { rule_id: rule.rule_id },
    });
  }

  Some(Selection {
    variant: control.unwrap_or(oldest),
    reason:  SelectionReason::Fallback,
  })
}

// ─── Weighted-random (experiments) ───────────────────────────────────────────

/// Draw an experiment variant with probability `weight / total_weight`.
pub fn select_weighted<'a, R>(variants: &'a [Variant], rng: &mut R) -> Option<Selection<'a>>
where
  R: Rng + ?Sized,
{
  let (variant, drawn) = pick_weighted(variants, |v| v.weight, rng)?;
  let reason = if drawn { SelectionReason::Weighted } else { SelectionReason::ZeroWeight };
  Some(Selection { variant, reason })
}

/// Weighted draw over any slice.
///
/// Draws `r` uniformly from `1..=total` and returns the first item whose
/// cumulative weight reaches `r`, so zero-weight items are never drawn. When
/// the total is zero the first item is returned and the flag is `false`.
pub fn pick_weighted<'a, T, R>(
  items:  &'a [T],
  weight: impl Fn(&T) -> u32,
  rng:    &mut R,
) -> Option<(&'a T, bool)>
where
  R: Rng + ?Sized,
{
  let first = items.first()?;
  let total: u64 = items.iter().map(|i| u64::from(weight(i))).sum();
  if total == 0 {
    return Some((first, false));
  }

  let draw = rng.gen_range(1..=total);
  let mut cumulative = 0u64;
  for item in items {
    cumulative += u64::from(weight(item));
    if cumulative >= draw {
      return Some((item, true));
    }
  }
  // Unreachable: the last item brings `cumulative` to `total >= draw`.
  items.last().map(|i| (i, true))
}
