//! Error taxonomy for the cache layer.
//!
//! Every error here is recoverable. The worst outcome of a persistent failure
//! is stale-but-present data, never data loss.

use thiserror::Error;

/// Maximum length for response bodies carried inside errors
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Failures reported by the transport boundary.
///
/// Kept `Clone` (no foreign error types inside) because a single in-flight
/// fetch hands the same outcome to every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
  #[error("Network error: {0}")]
  Network(String),

  #[error("Request timed out")]
  Timeout,

  #[error("Unauthorized - token may be expired")]
  Unauthorized,

  #[error("Server returned {status}: {body}")]
  Status { status: u16, body: String },

  #[error("Invalid response: {0}")]
  Decode(String),
}

impl TransportError {
  /// Truncate a response body to avoid logging excessive data
  fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
      body.to_string()
    } else {
      let mut end = MAX_ERROR_BODY_LENGTH;
      while !body.is_char_boundary(end) {
        end -= 1;
      }
      format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }
  }

  pub fn from_status(status: u16, body: &str) -> Self {
    match status {
      401 => TransportError::Unauthorized,
      _ => TransportError::Status {
        status,
        body: Self::truncate_body(body),
      },
    }
  }
}

impl From<reqwest::Error> for TransportError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_timeout() {
      TransportError::Timeout
    } else if err.is_decode() {
      TransportError::Decode(err.to_string())
    } else {
      TransportError::Network(err.to_string())
    }
  }
}

/// Malformed parameters or endpoint misuse. Raised before any network call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
  #[error("Unknown endpoint {resource}/{endpoint}")]
  UnknownEndpoint { resource: String, endpoint: String },

  #[error("Endpoint {0} is a mutation and cannot be queried")]
  NotAQuery(String),

  #[error("Endpoint {0} is a query and cannot be mutated")]
  NotAMutation(String),

  #[error("Parameters must be a JSON object, got {0}")]
  ParamsNotAnObject(String),

  #[error("Missing path parameter '{param}' for {endpoint}")]
  MissingPathParam { endpoint: String, param: String },

  #[error("Parameter '{param}' must be a positive integer")]
  InvalidPagination { param: String },

  #[error("Invalid tag '{0}'")]
  InvalidTag(String),

  #[error("Response is missing '{0}'")]
  MissingField(&'static str),
}

/// Realtime link failures. These never fail a query.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
  #[error("Failed to connect to hub: {0}")]
  Connect(String),

  #[error("Hub handshake failed: {0}")]
  Handshake(String),

  #[error("Hub connection closed: {0}")]
  Closed(String),

  #[error("Invalid hub url: {0}")]
  InvalidUrl(String),
}

/// Error surfaced by cache operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
  #[error(transparent)]
  Transport(#[from] TransportError),

  #[error(transparent)]
  Validation(#[from] ValidationError),

  #[error(transparent)]
  Connection(#[from] ConnectionError),
}

impl CacheError {
  /// Whether a later attempt could succeed without changing the request.
  pub fn is_retryable(&self) -> bool {
    !matches!(self, CacheError::Validation(_))
  }
}
