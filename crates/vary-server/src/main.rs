//! vary-server binary.
//!
//! Reads `config.toml` (or the path specified with `--config`) plus `VARY_*`
//! environment variables, opens the SQLite store, and serves the Vary HTTP
//! API.
//!
//! Nested keys use a double underscore in the environment, e.g.
//! `VARY_ENGINE__CAPACITY_POLICY=strict`.
//!
//! # Password hash generation
//!
//! To generate the argon2 PHC string for `admin_password_hash`:
//!
//! ```
//! cargo run -p vary-server -- --hash-password
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use clap::Parser;
use rand_core::OsRng;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use vary_core::engine::Engine;
use vary_server::{AppState, ServerConfig, auth::AuthConfig};
use vary_store_sqlite::SqliteStore;

#[derive(Parser)]
#[command(author, version, about = "Vary variant assignment server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Print the argon2 hash for a password entered on stdin and exit.
  #[arg(long)]
  hash_password: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing; `RUST_LOG` overrides the INFO default.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  if cli.hash_password {
    return print_password_hash();
  }

  let server_cfg = load_config(cli.config)?;
  let state = build_state(&server_cfg).await?;
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, vary_server::router(state)).await.context("server error")?;

  Ok(())
}

/// Helper mode: hash a password read from stdin and print the PHC string.
fn print_password_hash() -> anyhow::Result<()> {
  let password = read_password()?;
  let salt = SaltString::generate(&mut OsRng);
  let hash = Argon2::default()
    .hash_password(password.as_bytes(), &salt)
    .map_err(|e| anyhow::anyhow!("argon2 error: {e}"))?
    .to_string();
  println!("{hash}");
  Ok(())
}

/// Layer the optional config file under `VARY_*` environment variables.
fn load_config(path: PathBuf) -> anyhow::Result<ServerConfig> {
  config::Config::builder()
    .add_source(config::File::from(path).required(false))
    .add_source(config::Environment::with_prefix("VARY").separator("__"))
    .build()
    .context("failed to read config file")?
    .try_deserialize()
    .context("failed to deserialise ServerConfig")
}

/// Open the store and assemble the engine plus admin credentials.
async fn build_state(server_cfg: &ServerConfig) -> anyhow::Result<AppState<SqliteStore>> {
  let store_path = expand_tilde(&server_cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  // Reject an unusable hash now rather than on the first admin request.
  let auth = AuthConfig::new(&server_cfg.admin_username, &server_cfg.admin_password_hash)
    .context("invalid admin credentials in config")?;

  let engine = &server_cfg.engine;
  tracing::info!(
    capacity_policy = ?engine.capacity_policy,
    max_assign_attempts = engine.max_assign_attempts,
    "engine configured"
  );

  Ok(AppState {
    engine: Arc::new(Engine::new(store, engine.clone())),
    auth:   Arc::new(auth),
  })
}

/// Read a password line from stdin.
fn read_password() -> anyhow::Result<String> {
  use std::io::{self, BufRead, Write};
  print!("Password: ");
  io::stdout().flush().ok();
  let mut line = String::new();
  io::stdin().lock().read_line(&mut line)?;
  Ok(line.trim_end_matches(['\n', '\r']).to_string())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
