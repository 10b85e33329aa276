//! Handlers for assignment endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/assignments/{id}/exposure` | Idempotent; first timestamp wins |
//! | `POST` | `/assignments/{id}/conversion` | Body: `{"purchase_id":"…"}`; idempotent |
//! | `GET`  | `/variants/{id}/assignments` | Admin; 404 if the variant is unknown |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
};
use serde::Deserialize;
use uuid::Uuid;
use vary_core::{assignment::Assignment, engine::Engine, store::VariantStore};

use crate::error::ApiError;

// ─── Exposure ─────────────────────────────────────────────────────────────────

/// `POST /assignments/{id}/exposure`
pub async fn exposure<S>(
  State(engine): State<Arc<Engine<S>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Assignment>, ApiError>
where
  S: VariantStore,
{
  let recorded = engine.record_exposure(id).await?;
  Ok(Json(recorded.into_assignment()))
}

// ─── Conversion ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ConversionBody {
  pub purchase_id: Uuid,
}

/// `POST /assignments/{id}/conversion`
pub async fn conversion<S>(
  State(engine): State<Arc<Engine<S>>>,
  Path(id): Path<Uuid>,
  Json(body): Json<ConversionBody>,
) -> Result<Json<Assignment>, ApiError>
where
  S: VariantStore,
{
  let recorded = engine.record_conversion(id, body.purchase_id).await?;
  Ok(Json(recorded.into_assignment()))
}

// ─── List per variant ─────────────────────────────────────────────────────────

/// `GET /variants/{id}/assignments`
pub async fn list_for_variant<S>(
  State(engine): State<Arc<Engine<S>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<Assignment>>, ApiError>
where
  S: VariantStore,
{
  let store = engine.store();
  store
    .get_variant(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("variant {id} not found")))?;
  let assignments = store.list_assignments(id).await.map_err(ApiError::store)?;
  Ok(Json(assignments))
}
