//! Session slice and its key-value mirror.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;
use crate::persistence::{KeyValueStore, PersistenceError};

pub const ACCESS_TOKEN_KEY: &str = "auth.accessToken";
pub const REFRESH_TOKEN_KEY: &str = "auth.refreshToken";
pub const ROLE_KEY: &str = "auth.role";
pub const USER_KEY: &str = "auth.user";

/// Every key the session mirror writes.
pub const SESSION_KEYS: [&str; 4] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, ROLE_KEY, USER_KEY];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
  pub user_id: Option<String>,
  pub email: Option<String>,
  pub full_name: Option<String>,
}

impl UserProfile {
  /// Pick identity fields from a profile or auth response. Absent fields
  /// stay `None`.
  pub fn from_value(value: &Value) -> Self {
    let field = |names: &[&str]| {
      names.iter().find_map(|name| match value.get(*name) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
      })
    };
    Self {
      user_id: field(&["userId", "id"]),
      email: field(&["email"]),
      full_name: field(&["fullName", "name"]),
    }
  }

  /// Fields present in `other` replace ours.
  pub fn merge(&mut self, other: UserProfile) {
    if other.user_id.is_some() {
      self.user_id = other.user_id;
    }
    if other.email.is_some() {
      self.email = other.email;
    }
    if other.full_name.is_some() {
      self.full_name = other.full_name;
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
  pub access_token: String,
  pub refresh_token: Option<String>,
  pub role: Option<String>,
  pub user: UserProfile,
}

impl Session {
  /// Build a session from a login, OTP or refresh response.
  ///
  /// Accepts `accessToken` or `token`; the user block may be nested under
  /// `user` or flattened into the response.
  pub fn from_auth_response(value: &Value) -> Result<Self, ValidationError> {
    let access_token = ["accessToken", "token"]
      .iter()
      .find_map(|k| value.get(*k).and_then(Value::as_str))
      .filter(|t| !t.is_empty())
      .ok_or(ValidationError::MissingField("accessToken"))?
      .to_string();

    let user = match value.get("user") {
      Some(nested @ Value::Object(_)) => UserProfile::from_value(nested),
      _ => UserProfile::from_value(value),
    };

    Ok(Self {
      access_token,
      refresh_token: value
        .get("refreshToken")
        .and_then(Value::as_str)
        .map(String::from),
      role: value.get("role").and_then(Value::as_str).map(String::from),
      user,
    })
  }

  pub fn persist(&self, store: &dyn KeyValueStore) -> Result<(), PersistenceError> {
    store.set(ACCESS_TOKEN_KEY, &self.access_token)?;
    match &self.refresh_token {
      Some(token) => store.set(REFRESH_TOKEN_KEY, token)?,
      None => store.remove(&[REFRESH_TOKEN_KEY])?,
    }
    match &self.role {
      Some(role) => store.set(ROLE_KEY, role)?,
      None => store.remove(&[ROLE_KEY])?,
    }
    store.set(USER_KEY, &serde_json::to_string(&self.user)?)?;
    Ok(())
  }

  /// Read the mirror back. `None` without an access token.
  pub fn restore(store: &dyn KeyValueStore) -> Result<Option<Self>, PersistenceError> {
    let Some(access_token) = store.get(ACCESS_TOKEN_KEY)? else {
      return Ok(None);
    };
    let user = match store.get(USER_KEY)? {
      Some(raw) => serde_json::from_str(&raw)?,
      None => UserProfile::default(),
    };
    Ok(Some(Self {
      access_token,
      refresh_token: store.get(REFRESH_TOKEN_KEY)?,
      role: store.get(ROLE_KEY)?,
      user,
    }))
  }

  pub fn clear(store: &dyn KeyValueStore) -> Result<(), PersistenceError> {
    store.remove(&SESSION_KEYS)
  }
}
