//! JSON REST API for Vary.
//!
//! Exposes two axum [`Router`]s backed by an [`Engine`] over any
//! [`VariantStore`]:
//!
//! - [`public_router`]: resolution and exposure/conversion recording, called
//!   from rendering and checkout paths.
//! - [`admin_router`]: creator CRUD over variants and rules, plus metrics.
//!
//! Auth, TLS, and transport concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! let engine = Arc::new(Engine::new(store, EngineConfig::default()));
//! Router::new()
//!   .merge(vary_api::public_router(engine.clone()))
//!   .nest("/admin", vary_api::admin_router(engine))
//! ```

pub mod assignments;
pub mod error;
pub mod metrics;
pub mod resolve;
pub mod rules;
pub mod variants;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, patch, post},
};
use vary_core::{engine::Engine, store::VariantStore};

pub use error::ApiError;

/// Routes hit on every render and purchase.
pub fn public_router<S>(engine: Arc<Engine<S>>) -> Router<()>
where
  S: VariantStore + 'static,
{
  Router::new()
    .route("/resolve", post(resolve::resolve::<S>))
    .route("/price", post(resolve::price::<S>))
    .route("/assignments/{id}/exposure", post(assignments::exposure::<S>))
    .route("/assignments/{id}/conversion", post(assignments::conversion::<S>))
    .with_state(engine)
}

/// Creator-facing management routes.
pub fn admin_router<S>(engine: Arc<Engine<S>>) -> Router<()>
where
  S: VariantStore + 'static,
{
  Router::new()
    // Variants
    .route("/variants", get(variants::list::<S>).post(variants::create::<S>))
    .route(
      "/variants/{id}",
      get(variants::get_one::<S>)
        .patch(variants::update::<S>)
        .delete(variants::delete::<S>),
    )
    .route("/variants/{id}/assignments", get(assignments::list_for_variant::<S>))
    // Rules
    .route("/rules", get(rules::list::<S>).post(rules::create::<S>))
    .route("/rules/{id}", patch(rules::update::<S>).delete(rules::delete::<S>))
    // Metrics
    .route("/metrics", get(metrics::handler::<S>))
    .with_state(engine)
}

// ─── Router tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
  };
  use serde_json::{Value, json};
  use tower::ServiceExt as _;
  use uuid::Uuid;
  use vary_core::engine::EngineConfig;
  use vary_store_sqlite::SqliteStore;

  async fn make_engine() -> Arc<Engine<SqliteStore>> {
    let store = SqliteStore::open_in_memory().await.unwrap();
    Arc::new(Engine::new(store, EngineConfig::default()))
  }

  fn app(engine: &Arc<Engine<SqliteStore>>) -> Router {
    public_router(engine.clone()).merge(admin_router(engine.clone()))
  }

  async fn send(
    engine: &Arc<Engine<SqliteStore>>,
    method: &str,
    uri:    &str,
    body:   Option<Value>,
  ) -> Response {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
      Some(json) => builder
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json.to_string()))
        .unwrap(),
      None => builder.body(Body::empty()).unwrap(),
    };
    app(engine).oneshot(req).await.unwrap()
  }

  async fn json_body(resp: Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
  }

  async fn create_variant(engine: &Arc<Engine<SqliteStore>>, body: Value) -> Value {
    let resp = send(engine, "POST", "/variants", Some(body)).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    json_body(resp).await
  }

  // ── Variants ────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn create_list_and_get_variant() {
    let engine = make_engine().await;
    let post_id = Uuid::new_v4();
    let created = create_variant(
      &engine,
      json!({ "parent": { "kind": "post", "id": post_id }, "name": "Headline B", "content": "Hello" }),
    )
    .await;
    let id = created["variant_id"].as_str().unwrap().to_string();

    let resp = send(&engine, "GET", &format!("/variants?parent_kind=post&parent_id={post_id}"), None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let listed = json_body(resp).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let resp = send(&engine, "GET", &format!("/variants/{id}"), None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["name"], "Headline B");
  }

  #[tokio::test]
  async fn invalid_variant_is_400() {
    let engine = make_engine().await;
    let resp = send(
      &engine,
      "POST",
      "/variants",
      Some(json!({ "parent": { "kind": "experiment", "id": Uuid::new_v4() }, "name": "A", "is_control": true })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(resp).await["error"].as_str().unwrap().contains("control"));
  }

  #[tokio::test]
  async fn unknown_variant_is_404() {
    let engine = make_engine().await;
    let id = Uuid::new_v4();
    assert_eq!(send(&engine, "GET", &format!("/variants/{id}"), None).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(send(&engine, "DELETE", &format!("/variants/{id}"), None).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(
      send(&engine, "GET", &format!("/variants/{id}/assignments"), None).await.status(),
      StatusCode::NOT_FOUND
    );
  }

  #[tokio::test]
  async fn patch_clears_price_override() {
    let engine = make_engine().await;
    let created = create_variant(
      &engine,
      json!({ "parent": { "kind": "experiment", "id": Uuid::new_v4() }, "name": "A", "price_cents": 1500 }),
    )
    .await;
    let id = created["variant_id"].as_str().unwrap();

    let resp = send(&engine, "PATCH", &format!("/variants/{id}"), Some(json!({ "price_cents": null }))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(json_body(resp).await["price_cents"].is_null());
  }

  // ── Rules ───────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn duplicate_rule_is_409() {
    let engine = make_engine().await;
    let created = create_variant(
      &engine,
      json!({ "parent": { "kind": "post", "id": Uuid::new_v4() }, "name": "A" }),
    )
    .await;
    let rule = json!({
      "variant_id": created["variant_id"],
      "bucket_id": Uuid::new_v4(),
      "distribution_type": "count",
      "distribution_value": 5,
    });

    let resp = send(&engine, "POST", "/rules", Some(rule.clone())).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let rule_id = json_body(resp).await["rule_id"].as_str().unwrap().to_string();

    assert_eq!(send(&engine, "POST", "/rules", Some(rule)).await.status(), StatusCode::CONFLICT);

    let resp = send(
      &engine,
      "PATCH",
      &format!("/rules/{rule_id}"),
      Some(json!({ "distribution_type": "percentage", "distribution_value": 25 })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["distribution_value"], 25);

    assert_eq!(send(&engine, "DELETE", &format!("/rules/{rule_id}"), None).await.status(), StatusCode::NO_CONTENT);
  }

  #[tokio::test]
  async fn rule_on_experiment_variant_is_400() {
    let engine = make_engine().await;
    let created = create_variant(
      &engine,
      json!({ "parent": { "kind": "experiment", "id": Uuid::new_v4() }, "name": "A" }),
    )
    .await;
    let resp = send(
      &engine,
      "POST",
      "/rules",
      Some(json!({
        "variant_id": created["variant_id"],
        "bucket_id": Uuid::new_v4(),
        "distribution_type": "unlimited",
      })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
  }

  // ── Resolution & recording ──────────────────────────────────────────────────

  #[tokio::test]
  async fn resolve_is_stable_and_records_funnel() {
    let engine = make_engine().await;
    let exp_id = Uuid::new_v4();
    create_variant(
      &engine,
      json!({ "parent": { "kind": "experiment", "id": exp_id }, "name": "A", "price_cents": 1200 }),
    )
    .await;
    let request = json!({ "parent_kind": "experiment", "parent_id": exp_id, "buyer_cookie": "visitor-9" });

    let first = json_body(send(&engine, "POST", "/resolve", Some(request.clone())).await).await;
    assert_eq!(first["created"], true);
    let second = json_body(send(&engine, "POST", "/resolve", Some(request.clone())).await).await;
    assert_eq!(second["created"], false);
    assert_eq!(first["assignment_id"], second["assignment_id"]);

    let price = json_body(send(&engine, "POST", "/price", Some(request)).await).await;
    assert_eq!(price["price_cents"], 1200);

    let assignment_id = first["assignment_id"].as_str().unwrap();
    let resp = send(&engine, "POST", &format!("/assignments/{assignment_id}/exposure"), None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(json_body(resp).await["exposed_at"].is_string());

    let purchase = Uuid::new_v4();
    for _ in 0..2 {
      let resp = send(
        &engine,
        "POST",
        &format!("/assignments/{assignment_id}/conversion"),
        Some(json!({ "purchase_id": purchase })),
      )
      .await;
      assert_eq!(resp.status(), StatusCode::OK);
    }

    let resp = send(&engine, "GET", &format!("/metrics?parent_kind=experiment&parent_id={exp_id}"), None).await;
    let metrics = json_body(resp).await;
    assert_eq!(metrics[0]["assignments"], 1);
    assert_eq!(metrics[0]["exposures"], 1);
    assert_eq!(metrics[0]["conversions"], 1);
    assert_eq!(metrics[0]["conversion_rate"], 1.0);
  }

  #[tokio::test]
  async fn resolve_without_identity_returns_null_variant() {
    let engine = make_engine().await;
    let post_id = Uuid::new_v4();
    create_variant(&engine, json!({ "parent": { "kind": "post", "id": post_id }, "name": "A" })).await;

    let resp = send(&engine, "POST", "/resolve", Some(json!({ "parent_kind": "post", "parent_id": post_id }))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert!(body["variant"].is_null());
    assert!(body.get("assignment_id").is_none());
  }

  #[tokio::test]
  async fn exposure_for_unknown_assignment_is_404() {
    let engine = make_engine().await;
    let resp = send(&engine, "POST", &format!("/assignments/{}/exposure", Uuid::new_v4()), None).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
  }
}
