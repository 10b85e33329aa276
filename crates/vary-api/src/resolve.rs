//! Handlers for the rendering-path endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/resolve` | Bound variant, binding the identity on first contact |
//! | `POST` | `/price` | The bound variant's price override, if any |
//!
//! Both take the same body. `bucket_id` is the visitor's tier and only
//! matters for posts; identity components are whatever the caller knows.
//!
//! ```json
//! {"parent_kind":"post","parent_id":"…","bucket_id":"…","user_id":"…"}
//! ```

use std::sync::Arc;

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vary_core::{
  engine::Engine,
  identity::IdentityParts,
  parent::{ParentKind, ParentRef},
  store::VariantStore,
  variant::Variant,
};

use crate::error::ApiError;

/// A parent as it appears in request bodies and query strings.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ParentParams {
  pub parent_kind: ParentKind,
  pub parent_id:   Uuid,
}

impl ParentParams {
  pub fn parent(&self) -> ParentRef { ParentRef { kind: self.parent_kind, id: self.parent_id } }
}

#[derive(Debug, Deserialize)]
pub struct ResolveBody {
  #[serde(flatten)]
  pub parent:    ParentParams,
  pub bucket_id: Option<Uuid>,
  #[serde(flatten)]
  pub identity:  IdentityParts,
}

// ─── Resolve ──────────────────────────────────────────────────────────────────

/// `variant` is `null` when the caller should render the unvaried content.
#[derive(Debug, Serialize)]
pub struct ResolveResponse {
  pub variant:       Option<Variant>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub assignment_id: Option<Uuid>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub created:       Option<bool>,
}

/// `POST /resolve`
pub async fn resolve<S>(
  State(engine): State<Arc<Engine<S>>>,
  Json(body): Json<ResolveBody>,
) -> Result<Json<ResolveResponse>, ApiError>
where
  S: VariantStore,
{
  let resolution = engine
    .find_or_assign(body.parent.parent(), body.bucket_id, &body.identity)
    .await?;
  Ok(Json(match resolution {
    Some(r) => ResolveResponse {
      assignment_id: Some(r.assignment.assignment_id),
      created:       Some(r.created),
      variant:       Some(r.variant),
    },
    None => ResolveResponse { variant: None, assignment_id: None, created: None },
  }))
}

// ─── Price ────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct PriceResponse {
  pub price_cents: Option<i64>,
}

/// `POST /price`
pub async fn price<S>(
  State(engine): State<Arc<Engine<S>>>,
  Json(body): Json<ResolveBody>,
) -> Result<Json<PriceResponse>, ApiError>
where
  S: VariantStore,
{
  let price_cents = engine
    .resolve_price_override(body.parent.parent(), body.bucket_id, &body.identity)
    .await?;
  Ok(Json(PriceResponse { price_cents }))
}
