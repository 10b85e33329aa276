//! `GET /metrics?parent_kind=…&parent_id=…`: per-variant counters and
//! conversion rates for one parent, in variant creation order.

use std::sync::Arc;

use axum::{
  Json,
  extract::{Query, State},
};
use vary_core::{engine::Engine, metrics::VariantMetrics, store::VariantStore};

use crate::{error::ApiError, resolve::ParentParams};

pub async fn handler<S>(
  State(engine): State<Arc<Engine<S>>>,
  Query(params): Query<ParentParams>,
) -> Result<Json<Vec<VariantMetrics>>, ApiError>
where
  S: VariantStore,
{
  Ok(Json(engine.variant_metrics(params.parent()).await?))
}
