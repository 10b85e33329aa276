//! Handlers for `/variants` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/variants` | Required `?parent_kind=post\|experiment&parent_id=…` |
//! | `POST`   | `/variants` | Body: [`NewVariant`] |
//! | `GET`    | `/variants/{id}` | 404 if not found |
//! | `PATCH`  | `/variants/{id}` | Body: [`VariantPatch`]; `"price_cents":null` clears the override |
//! | `DELETE` | `/variants/{id}` | Drops the variant's rules and assignments |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;
use vary_core::{
  engine::Engine,
  store::VariantStore,
  variant::{NewVariant, Variant, VariantPatch},
};

use crate::{error::ApiError, resolve::ParentParams};

/// `GET /variants?parent_kind=<kind>&parent_id=<id>`
pub async fn list<S>(
  State(engine): State<Arc<Engine<S>>>,
  Query(params): Query<ParentParams>,
) -> Result<Json<Vec<Variant>>, ApiError>
where
  S: VariantStore,
{
  let variants = engine
    .store()
    .list_variants(params.parent())
    .await
    .map_err(ApiError::store)?;
  Ok(Json(variants))
}

/// `POST /variants`
pub async fn create<S>(
  State(engine): State<Arc<Engine<S>>>,
  Json(body): Json<NewVariant>,
) -> Result<impl IntoResponse, ApiError>
where
  S: VariantStore,
{
  let variant = engine.store().create_variant(body).await.map_err(ApiError::store)?;
  info!(variant = %variant.variant_id, parent = %variant.parent.id, "variant created");
  Ok((StatusCode::CREATED, Json(variant)))
}

/// `GET /variants/{id}`
pub async fn get_one<S>(
  State(engine): State<Arc<Engine<S>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Variant>, ApiError>
where
  S: VariantStore,
{
  let variant = engine
    .store()
    .get_variant(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("variant {id} not found")))?;
  Ok(Json(variant))
}

/// `PATCH /variants/{id}`
pub async fn update<S>(
  State(engine): State<Arc<Engine<S>>>,
  Path(id): Path<Uuid>,
  Json(patch): Json<VariantPatch>,
) -> Result<Json<Variant>, ApiError>
where
  S: VariantStore,
{
  let variant = engine.store().update_variant(id, patch).await.map_err(ApiError::store)?;
  Ok(Json(variant))
}

/// `DELETE /variants/{id}`
pub async fn delete<S>(
  State(engine): State<Arc<Engine<S>>>,
  Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError>
where
  S: VariantStore,
{
  if engine.store().delete_variant(id).await.map_err(ApiError::store)? {
    info!(variant = %id, "variant deleted");
    Ok(StatusCode::NO_CONTENT)
  } else {
    Err(ApiError::NotFound(format!("variant {id} not found")))
  }
}
