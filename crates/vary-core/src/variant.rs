//! Variant: a named content/price alternative belonging to a parent.
//!
//! Post variants and experiment variants share one shape. Fields that only
//! make sense for one kind (`is_control` for posts, `weight` for experiments)
//! are validated against the parent kind on write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  metrics::{VariantCounters, VariantMetrics},
  parent::{ParentKind, ParentRef},
};

/// Weight given to experiment variants created without one.
pub const DEFAULT_WEIGHT: u32 = 1;

/// A persisted variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
  pub variant_id:  Uuid,
  pub parent:      ParentRef,
  pub name:        String,
  /// Post message body, or product description override.
  pub content:     String,
  pub is_control:  bool,
  pub price_cents: Option<i64>,
  /// Relative draw weight; always [`DEFAULT_WEIGHT`] on post variants.
  pub weight:      u32,
  pub created_at:  DateTime<Utc>,
  pub counters:    VariantCounters,
}

impl Variant {
  pub fn metrics(&self) -> VariantMetrics {
    VariantMetrics {
      variant_id:      self.variant_id,
      name:            self.name.clone(),
      is_control:      self.is_control,
      counters:        self.counters,
      conversion_rate: self.counters.conversion_rate(),
    }
  }
}

/// Input for creating a variant. The store assigns the id and `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewVariant {
  pub parent:      ParentRef,
  pub name:        String,
  #[serde(default)]
  pub content:     String,
  #[serde(default)]
  pub is_control:  bool,
  pub price_cents: Option<i64>,
  pub weight:      Option<u32>,
}

impl NewVariant {
  pub fn new(parent: ParentRef, name: impl Into<String>) -> Self {
    Self {
      parent,
      name: name.into(),
      content: String::new(),
      is_control: false,
      price_cents: None,
      weight: None,
    }
  }

  pub fn control(mut self) -> Self {
    self.is_control = true;
    self
  }

  pub fn with_weight(mut self, weight: u32) -> Self {
    self.weight = Some(weight);
    self
  }

  pub fn with_price(mut self, cents: i64) -> Self {
    self.price_cents = Some(cents);
    self
  }

  pub fn with_content(mut self, content: impl Into<String>) -> Self {
    self.content = content.into();
    self
  }

  /// Check the input against the parent kind and normalise it.
  pub fn validate(mut self) -> Result<Self> {
    self.name = validate_name(&self.name)?;
    validate_kind_fields(self.parent.kind, self.is_control, self.weight)?;
    validate_price(self.price_cents)?;
    Ok(self)
  }

  /// The weight that will be stored for this variant.
  pub fn effective_weight(&self) -> u32 { self.weight.unwrap_or(DEFAULT_WEIGHT) }
}

/// Partial update of a variant. `None` leaves a field unchanged; the price
/// override is cleared with `Some(None)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariantPatch {
  pub name:        Option<String>,
  pub content:     Option<String>,
  pub is_control:  Option<bool>,
  #[serde(default, with = "double_option")]
  pub price_cents: Option<Option<i64>>,
  pub weight:      Option<u32>,
}

impl VariantPatch {
  /// Apply the patch to `variant`, returning the validated result.
  pub fn apply(self, variant: &Variant) -> Result<Variant> {
    let mut next = variant.clone();
    if let Some(name) = self.name {
      next.name = validate_name(&name)?;
    }
    if let Some(content) = self.content {
      next.content = content;
    }
    validate_kind_fields(variant.parent.kind, self.is_control.unwrap_or(false), self.weight)?;
    if let Some(is_control) = self.is_control {
      next.is_control = is_control;
    }
    if let Some(weight) = self.weight {
      next.weight = weight;
    }
    if let Some(price) = self.price_cents {
      validate_price(price)?;
      next.price_cents = price;
    }
    Ok(next)
  }
}

fn validate_name(name: &str) -> Result<String> {
  let trimmed = name.trim();
  if trimmed.is_empty() {
    return Err(Error::EmptyName);
  }
  Ok(trimmed.to_owned())
}

fn validate_kind_fields(kind: ParentKind, is_control: bool, weight: Option<u32>) -> Result<()> {
  match kind {
    ParentKind::Post if weight.is_some() => Err(Error::WeightOnNonExperiment),
    ParentKind::Experiment if is_control => Err(Error::ControlOnNonPost),
    _ => Ok(()),
  }
}

fn validate_price(price: Option<i64>) -> Result<()> {
  match price {
    Some(cents) if cents < 0 => Err(Error::NegativePrice(cents)),
    _ => Ok(()),
  }
}

/// Distinguishes an absent field from an explicit `null`.
mod double_option {
  use serde::{Deserialize, Deserializer, Serialize, Serializer};

  pub fn serialize<S, T>(value: &Option<Option<T>>, s: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
    T: Serialize,
  {
    match value {
      Some(inner) => inner.serialize(s),
      None => s.serialize_none(),
    }
  }

  pub fn deserialize<'de, D, T>(d: D) -> Result<Option<Option<T>>, D::Error>
  where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
  {
    Option::<T>::deserialize(d).map(Some)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn post_variant() -> Variant {
    Variant {
      variant_id:  Uuid::new_v4(),
      parent:      ParentRef::post(Uuid::new_v4()),
      name:        "Control".into(),
      content:     "Hello".into(),
      is_control:  true,
      price_cents: None,
      weight:      DEFAULT_WEIGHT,
      created_at:  Utc::now(),
      counters:    VariantCounters::default(),
    }
  }

  #[test]
  fn blank_name_is_rejected() {
    let input = NewVariant::new(ParentRef::post(Uuid::new_v4()), "   ");
    assert!(matches!(input.validate(), Err(Error::EmptyName)));
  }

  #[test]
  fn name_is_trimmed() {
    let input = NewVariant::new(ParentRef::post(Uuid::new_v4()), "  Spring sale ");
    assert_eq!(input.validate().unwrap().name, "Spring sale");
  }

  #[test]
  fn experiment_variants_cannot_be_control() {
    let input = NewVariant::new(ParentRef::experiment(Uuid::new_v4()), "A").control();
    assert!(matches!(input.validate(), Err(Error::ControlOnNonPost)));
  }

  #[test]
  fn post_variants_cannot_carry_weight() {
    let input = NewVariant::new(ParentRef::post(Uuid::new_v4()), "A").with_weight(3);
    assert!(matches!(input.validate(), Err(Error::WeightOnNonExperiment)));
  }

  #[test]
  fn negative_price_is_rejected() {
    let input = NewVariant::new(ParentRef::experiment(Uuid::new_v4()), "A").with_price(-1);
    assert!(matches!(input.validate(), Err(Error::NegativePrice(-1))));
  }

  #[test]
  fn experiment_weight_defaults_to_one() {
    let input = NewVariant::new(ParentRef::experiment(Uuid::new_v4()), "A");
    assert_eq!(input.effective_weight(), DEFAULT_WEIGHT);
  }

  #[test]
  fn patch_distinguishes_absent_and_null_price() {
    let absent: VariantPatch = serde_json::from_str(r#"{"name":"B"}"#).unwrap();
    assert_eq!(absent.price_cents, None);

    let cleared: VariantPatch = serde_json::from_str(r#"{"price_cents":null}"#).unwrap();
    assert_eq!(cleared.price_cents, Some(None));

    let mut variant = post_variant();
    variant.price_cents = Some(500);
    assert_eq!(cleared.apply(&variant).unwrap().price_cents, None);
  }

  #[test]
  fn patch_keeps_untouched_fields() {
    let variant = post_variant();
    let patch = VariantPatch { content: Some("Bonjour".into()), ..VariantPatch::default() };
    let next = patch.apply(&variant).unwrap();
    assert_eq!(next.name, "Control");
    assert_eq!(next.content, "Bonjour");
    assert!(next.is_control);
  }
}
