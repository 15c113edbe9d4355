//! Response envelope normalization.
//!
//! The server sometimes wraps arrays as `{"$id": "1", "$values": [...]}`
//! (reference-preserving serializer) and sometimes wraps a payload as
//! `{"data": ...}`. Both are unwrapped here, once, so nothing above the
//! transport has to know about either shape.

use serde_json::{Map, Value};

const VALUES_FIELD: &str = "$values";
const ID_FIELD: &str = "$id";
const DATA_FIELD: &str = "data";

/// Strip serializer wrappers from a response body.
pub fn normalize(value: Value) -> Value {
  match value {
    Value::Object(map) => match unwrap_object(map) {
      Unwrapped::Inner(inner) => normalize(inner),
      Unwrapped::Object(map) => Value::Object(
        map
          .into_iter()
          .filter(|(k, _)| k != ID_FIELD)
          .map(|(k, v)| (k, normalize(v)))
          .collect(),
      ),
    },
    Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
    other => other,
  }
}

enum Unwrapped {
  Inner(Value),
  Object(Map<String, Value>),
}

fn unwrap_object(mut map: Map<String, Value>) -> Unwrapped {
  if map.get(VALUES_FIELD).map(Value::is_array).unwrap_or(false) {
    if let Some(values) = map.remove(VALUES_FIELD) {
      return Unwrapped::Inner(values);
    }
  }
  // Only a bare `{"data": ...}` is an envelope; objects that merely have a
  // `data` field next to paging metadata are payloads.
  if map.len() == 1 && map.contains_key(DATA_FIELD) {
    if let Some(inner) = map.remove(DATA_FIELD) {
      return Unwrapped::Inner(inner);
    }
  }
  Unwrapped::Object(map)
}
