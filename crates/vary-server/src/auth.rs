//! HTTP Basic auth for the admin routes.

use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::{
  extract::{Request, State},
  http::HeaderMap,
  middleware::Next,
  response::Response,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use tracing::warn;

use crate::error::{Error, Result};

/// Credentials accepted for the admin API.
#[derive(Clone)]
pub struct AuthConfig {
  pub username:      String,
  /// PHC string produced by argon2, e.g. `$argon2id$v=19$…`
  pub password_hash: String,
}

impl AuthConfig {
  /// Build the config, rejecting a hash that could never verify.
  pub fn new(username: impl Into<String>, password_hash: impl Into<String>) -> Result<Self> {
    let password_hash = password_hash.into();
    PasswordHash::new(&password_hash).map_err(|e| Error::InvalidPasswordHash(e.to_string()))?;
    Ok(Self { username: username.into(), password_hash })
  }
}

/// Verify `Authorization: Basic …` against `config`.
pub fn verify_auth(headers: &HeaderMap, config: &AuthConfig) -> Result<()> {
  let header_val = headers
    .get(axum::http::header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .ok_or(Error::Unauthorized)?;

  let encoded = header_val
    .strip_prefix("Basic ")
    .ok_or(Error::Unauthorized)?;

  let decoded = B64.decode(encoded).map_err(|_| Error::Unauthorized)?;
  let creds   = std::str::from_utf8(&decoded).map_err(|_| Error::Unauthorized)?;

  let (username, password) = creds.split_once(':').ok_or(Error::Unauthorized)?;

  if username != config.username {
    return Err(Error::Unauthorized);
  }

  let parsed_hash = PasswordHash::new(&config.password_hash)
    .map_err(|_| Error::Unauthorized)?;

  Argon2::default()
    .verify_password(password.as_bytes(), &parsed_hash)
    .map_err(|_| Error::Unauthorized)?;

  Ok(())
}

/// Middleware guarding the admin router.
pub async fn require_admin(
  State(config): State<Arc<AuthConfig>>,
  request: Request,
  next: Next,
) -> Result<Response> {
  if let Err(e) = verify_auth(request.headers(), &config) {
    warn!(path = %request.uri().path(), "rejected admin request");
    return Err(e);
  }
  Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
  use super::*;
  use argon2::{PasswordHasher, password_hash::SaltString};
  use axum::http::header;
  use rand_core::OsRng;

  fn make_config(password: &str) -> AuthConfig {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
      .hash_password(password.as_bytes(), &salt)
      .unwrap()
      .to_string();
    AuthConfig::new("admin", hash).unwrap()
  }

  fn headers(value: &str) -> HeaderMap {
    let mut map = HeaderMap::new();
    map.insert(header::AUTHORIZATION, value.parse().unwrap());
    map
  }

  fn basic(user: &str, pass: &str) -> String {
    let encoded = B64.encode(format!("{user}:{pass}"));
    format!("Basic {encoded}")
  }

  #[test]
  fn correct_credentials() {
    let config = make_config("secret");
    assert!(verify_auth(&headers(&basic("admin", "secret")), &config).is_ok());
  }

  #[test]
  fn wrong_password() {
    let config = make_config("secret");
    let result = verify_auth(&headers(&basic("admin", "wrong")), &config);
    assert!(matches!(result, Err(Error::Unauthorized)));
  }

  #[test]
  fn wrong_username() {
    let config = make_config("secret");
    let result = verify_auth(&headers(&basic("someone", "secret")), &config);
    assert!(matches!(result, Err(Error::Unauthorized)));
  }

  #[test]
  fn missing_header() {
    let config = make_config("secret");
    assert!(matches!(verify_auth(&HeaderMap::new(), &config), Err(Error::Unauthorized)));
  }

  #[test]
  fn invalid_base64() {
    let config = make_config("secret");
    let result = verify_auth(&headers("Basic !!!not-base64!!!"), &config);
    assert!(matches!(result, Err(Error::Unauthorized)));
  }

  #[test]
  fn malformed_hash_is_rejected_up_front() {
    assert!(matches!(
      AuthConfig::new("admin", "plaintext"),
      Err(Error::InvalidPasswordHash(_))
    ));
  }
}
