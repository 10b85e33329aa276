//! HTTP server for Vary.
//!
//! Wires a [`SqliteStore`]-backed [`Engine`] into the routers from
//! `vary-api`, guards the admin routes with HTTP Basic auth, and adds
//! request tracing.

pub mod auth;
pub mod error;

pub use error::Error;

use std::{path::PathBuf, sync::Arc};

use axum::{Router, middleware};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use vary_core::{
  engine::{Engine, EngineConfig},
  store::VariantStore,
};

use auth::{AuthConfig, require_admin};

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `VARY_*` environment variables.
#[derive(Deserialize, Clone)]
pub struct ServerConfig {
  pub host:                String,
  pub port:                u16,
  pub store_path:          PathBuf,
  pub admin_username:      String,
  pub admin_password_hash: String,
  #[serde(default)]
  pub engine:              EngineConfig,
}

// ─── Application state ────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState<S> {
  pub engine: Arc<Engine<S>>,
  pub auth:   Arc<AuthConfig>,
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Public routes at the root, admin routes under `/admin` behind Basic auth.
pub fn router<S>(state: AppState<S>) -> Router
where
  S: VariantStore + 'static,
{
  let admin = vary_api::admin_router(state.engine.clone())
    .layer(middleware::from_fn_with_state(state.auth.clone(), require_admin));

  Router::new()
    .merge(vary_api::public_router(state.engine))
    .nest("/admin", admin)
    .layer(TraceLayer::new_for_http())
}
