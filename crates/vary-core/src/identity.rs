//! Identity: the stable key an assignment is bound to.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};
use uuid::Uuid;

/// Exactly one of subscription, user or anonymous buyer cookie.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Identity {
  Subscription(Uuid),
  User(Uuid),
  BuyerCookie(String),
}

/// The raw identity components a request carries.
///
/// Produced by the caller's "current identity" resolver. Any combination of
/// fields may be set; [`IdentityParts::resolve`] is the only way to get an
/// [`Identity`] suitable for creating a binding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityParts {
  #[serde(default)]
  pub subscription_id: Option<Uuid>,
  #[serde(default)]
  pub user_id:         Option<Uuid>,
  #[serde(default)]
  pub buyer_cookie:    Option<String>,
}

impl IdentityParts {
  pub fn subscription(id: Uuid) -> Self {
    Self { subscription_id: Some(id), ..Self::default() }
  }

  pub fn user(id: Uuid) -> Self { Self { user_id: Some(id), ..Self::default() } }

  pub fn buyer_cookie(token: impl Into<String>) -> Self {
    Self { buyer_cookie: Some(token.into()), ..Self::default() }
  }

  /// The single identity present, or `None` when zero or several components
  /// are set. Empty cookies count as absent.
  pub fn resolve(&self) -> Option<Identity> {
    let mut present = self.lookup_order();
    let first = present.next()?;
    match present.next() {
      Some(_) => None,
      None => Some(first),
    }
  }

  /// Present components, most durable first: subscription, user, cookie.
  pub fn lookup_order(&self) -> impl Iterator<Item = Identity> + '_ {
    let subscription = self.subscription_id.map(Identity::Subscription);
    let user = self.user_id.map(Identity::User);
    let cookie = self
      .buyer_cookie
      .as_deref()
      .filter(|c| !c.is_empty())
      .map(|c| Identity::BuyerCookie(c.to_owned()));
    subscription.into_iter().chain(user).chain(cookie)
  }
}

impl From<Identity> for IdentityParts {
  fn from(identity: Identity) -> Self {
    match identity {
      Identity::Subscription(id) => Self::subscription(id),
      Identity::User(id) => Self::user(id),
      Identity::BuyerCookie(token) => Self::buyer_cookie(token),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn resolve_requires_exactly_one_component() {
    assert_eq!(IdentityParts::default().resolve(), None);

    let user = Uuid::new_v4();
    assert_eq!(IdentityParts::user(user).resolve(), Some(Identity::User(user)));

    let both = IdentityParts {
      user_id: Some(user),
      buyer_cookie: Some("abc".into()),
      ..IdentityParts::default()
    };
    assert_eq!(both.resolve(), None);
  }

  #[test]
  fn empty_cookie_is_absent() {
    assert_eq!(IdentityParts::buyer_cookie("").resolve(), None);
  }

  #[test]
  fn lookup_order_prefers_durable_identities() {
    let sub = Uuid::new_v4();
    let user = Uuid::new_v4();
    let parts = IdentityParts {
      subscription_id: Some(sub),
      user_id:         Some(user),
      buyer_cookie:    Some("abc".into()),
    };
    let order: Vec<_> = parts.lookup_order().collect();
    assert_eq!(order, vec![
      Identity::Subscription(sub),
      Identity::User(user),
      Identity::BuyerCookie("abc".into()),
    ]);
  }

  #[test]
  fn identity_serializes_tagged() {
    let json = serde_json::to_value(Identity::BuyerCookie("abc".into())).unwrap();
    assert_eq!(json, serde_json::json!({ "kind": "buyer_cookie", "id": "abc" }));
  }
}
