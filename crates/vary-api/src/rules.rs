//! Handlers for `/rules` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/rules` | Required `?variant_id=…` |
//! | `POST`   | `/rules` | Body: `{"variant_id":…,"bucket_id":…,"distribution_type":"count","distribution_value":5}` |
//! | `PATCH`  | `/rules/{id}` | Body: `{"distribution_type":…,"distribution_value":…}` |
//! | `DELETE` | `/rules/{id}` | |
//!
//! A second rule for the same variant and bucket is a 409.

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;
use vary_core::{
  engine::Engine,
  rule::{Distribution, DistributionRule, NewRule},
  store::VariantStore,
};

use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub variant_id: Uuid,
}

/// `GET /rules?variant_id=<id>`
pub async fn list<S>(
  State(engine): State<Arc<Engine<S>>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<DistributionRule>>, ApiError>
where
  S: VariantStore,
{
  let rules = engine
    .store()
    .list_rules(params.variant_id)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(rules))
}

/// `POST /rules`
pub async fn create<S>(
  State(engine): State<Arc<Engine<S>>>,
  Json(body): Json<NewRule>,
) -> Result<impl IntoResponse, ApiError>
where
  S: VariantStore,
{
  let rule = engine.store().create_rule(body).await.map_err(ApiError::store)?;
  Ok((StatusCode::CREATED, Json(rule)))
}

/// `PATCH /rules/{id}`
pub async fn update<S>(
  State(engine): State<Arc<Engine<S>>>,
  Path(id): Path<Uuid>,
  Json(distribution): Json<Distribution>,
) -> Result<Json<DistributionRule>, ApiError>
where
  S: VariantStore,
{
  let rule = engine
    .store()
    .update_rule(id, distribution)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(rule))
}

/// `DELETE /rules/{id}`
pub async fn delete<S>(
  State(engine): State<Arc<Engine<S>>>,
  Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError>
where
  S: VariantStore,
{
  if engine.store().delete_rule(id).await.map_err(ApiError::store)? {
    Ok(StatusCode::NO_CONTENT)
  } else {
    Err(ApiError::NotFound(format!("rule {id} not found")))
  }
}
