//! Cache key construction.

use std::fmt;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::api::ResourceName;

/// Identity of one memoized request.
///
/// Parameters are stored in canonical serialized form, so two calls with
/// logically identical parameters address the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
  resource: ResourceName,
  endpoint: String,
  params: String,
}

impl CacheKey {
  pub fn new(resource: ResourceName, endpoint: &str, params: &Value) -> Self {
    Self {
      resource,
      endpoint: endpoint.to_string(),
      params: serialize_params(params),
    }
  }

  pub fn resource(&self) -> ResourceName {
    self.resource
  }

  pub fn endpoint(&self) -> &str {
    &self.endpoint
  }

  /// Canonical serialized parameters.
  pub fn params(&self) -> &str {
    &self.params
  }

  /// Parameters parsed back from their canonical form, used to rebuild the
  /// request for a background refetch.
  pub fn params_value(&self) -> Value {
    serde_json::from_str(&self.params).unwrap_or(Value::Null)
  }

  /// Stable, fixed-length identifier for log correlation.
  pub fn fingerprint(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.resource.as_str().as_bytes());
    hasher.update(b"/");
    hasher.update(self.endpoint.as_bytes());
    hasher.update(b"?");
    hasher.update(self.params.as_bytes());
    hex::encode(&hasher.finalize()[..8])
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}({})", self.resource, self.endpoint, self.params)
  }
}

/// Recursively sort object keys so serialization does not depend on
/// insertion order.
pub fn canonicalize(value: &Value) -> Value {
  match value {
    Value::Object(map) => {
      let mut entries: Vec<(&String, &Value)> = map.iter().collect();
      entries.sort_by(|a, b| a.0.cmp(b.0));
      let mut sorted = Map::new();
      for (k, v) in entries {
        sorted.insert(k.clone(), canonicalize(v));
      }
      Value::Object(sorted)
    }
    Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
    other => other.clone(),
  }
}

/// `null` and `{}` both mean "no parameters".
fn serialize_params(params: &Value) -> String {
  match params {
    Value::Null => "{}".to_string(),
    Value::Object(map) if map.is_empty() => "{}".to_string(),
    other => write_canonical(&canonicalize(other)),
  }
}

/// Writes objects with keys in sorted order regardless of how the map
/// implementation orders them internally.
fn write_canonical(value: &Value) -> String {
  match value {
    Value::Object(map) => {
      let mut keys: Vec<&String> = map.keys().collect();
      keys.sort();
      let fields: Vec<String> = keys
        .into_iter()
        .map(|k| format!("{}:{}", Value::String(k.clone()), write_canonical(&map[k])))
        .collect();
      format!("{{{}}}", fields.join(","))
    }
    Value::Array(items) => {
      let items: Vec<String> = items.iter().map(write_canonical).collect();
      format!("[{}]", items.join(","))
    }
    other => other.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn key_order_does_not_fragment_entries() {
    let a = CacheKey::new(
      ResourceName::Animals,
      "getAnimals",
      &json!({"pageSize": 10, "currentPage": 1, "filter": {"b": 1, "a": 2}}),
    );
    let b = CacheKey::new(
      ResourceName::Animals,
      "getAnimals",
      &json!({"filter": {"a": 2, "b": 1}, "currentPage": 1, "pageSize": 10}),
    );
    assert_eq!(a, b);
    assert_eq!(a.fingerprint(), b.fingerprint());
    assert_eq!(
      a.params(),
      r#"{"currentPage":1,"filter":{"a":2,"b":1},"pageSize":10}"#
    );
  }

  #[test]
  fn pagination_variants_are_distinct() {
    let page1 = CacheKey::new(ResourceName::Animals, "getAnimals", &json!({"currentPage": 1}));
    let page2 = CacheKey::new(ResourceName::Animals, "getAnimals", &json!({"currentPage": 2}));
    assert_ne!(page1, page2);
    assert_ne!(page1.fingerprint(), page2.fingerprint());
  }

  #[test]
  fn null_and_empty_params_are_the_same_key() {
    let a = CacheKey::new(ResourceName::News, "getNews", &Value::Null);
    let b = CacheKey::new(ResourceName::News, "getNews", &json!({}));
    assert_eq!(a, b);
  }

  #[test]
  fn resource_is_part_of_identity() {
    let a = CacheKey::new(ResourceName::News, "getById", &json!({"id": 1}));
    let b = CacheKey::new(ResourceName::Events, "getById", &json!({"id": 1}));
    assert_ne!(a, b);
  }
}
