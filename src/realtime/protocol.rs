//! JSON hub protocol framing.
//!
//! Every message is a JSON object terminated by the ASCII record separator.
//! The client opens with a handshake naming the protocol; the server answers
//! with `{}` or `{"error": ...}`. After that the server sends invocations
//! (`type` 1), pings (6) and a close message (7).

use serde::Deserialize;
use serde_json::Value;

use crate::error::ConnectionError;

pub const RECORD_SEPARATOR: char = '\u{1e}';

const INVOCATION: u64 = 1;
const PING: u64 = 6;
const CLOSE: u64 = 7;

#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
  Invocation { target: String, arguments: Vec<Value> },
  Ping,
  Close { error: Option<String>, allow_reconnect: bool },
  /// Message types the client does not act on (completions, streams, ...)
  Other(u64),
}

#[derive(Deserialize)]
struct RawMessage {
  #[serde(rename = "type")]
  kind: u64,
  target: Option<String>,
  #[serde(default)]
  arguments: Vec<Value>,
  error: Option<String>,
  #[serde(rename = "allowReconnect", default)]
  allow_reconnect: bool,
}

#[derive(Deserialize)]
struct HandshakeResponse {
  error: Option<String>,
}

pub fn handshake_request() -> String {
  format!(r#"{{"protocol":"json","version":1}}{}"#, RECORD_SEPARATOR)
}

pub fn ping() -> String {
  format!(r#"{{"type":{}}}{}"#, PING, RECORD_SEPARATOR)
}

/// Split a text frame into records, skipping empty ones.
fn records(text: &str) -> impl Iterator<Item = &str> {
  text
    .split(RECORD_SEPARATOR)
    .map(str::trim)
    .filter(|r| !r.is_empty())
}

/// Parse every record in a frame.
pub fn parse_frame(text: &str) -> Vec<Result<HubMessage, serde_json::Error>> {
  records(text).map(parse_record).collect()
}

fn parse_record(record: &str) -> Result<HubMessage, serde_json::Error> {
  let raw: RawMessage = serde_json::from_str(record)?;
  Ok(match raw.kind {
    INVOCATION => HubMessage::Invocation {
      target: raw.target.unwrap_or_default(),
      arguments: raw.arguments,
    },
    PING => HubMessage::Ping,
    CLOSE => HubMessage::Close {
      error: raw.error,
      allow_reconnect: raw.allow_reconnect,
    },
    other => HubMessage::Other(other),
  })
}

/// Check the handshake response. Messages that arrived in the same frame
/// are returned so they are not lost.
pub fn parse_handshake(text: &str) -> Result<Vec<HubMessage>, ConnectionError> {
  let mut records = records(text);
  let first = records
    .next()
    .ok_or_else(|| ConnectionError::Handshake("empty handshake response".to_string()))?;
  let response: HandshakeResponse =
    serde_json::from_str(first).map_err(|e| ConnectionError::Handshake(e.to_string()))?;
  if let Some(error) = response.error {
    return Err(ConnectionError::Handshake(error));
  }
  Ok(records.filter_map(|r| parse_record(r).ok()).collect())
}
