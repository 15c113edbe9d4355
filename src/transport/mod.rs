//! Transport boundary: "send request, get JSON".
//!
//! The cache only needs [`Transport::send`]. Headers are attached by the
//! concrete transport's interceptor, and every response goes through
//! [`envelope::normalize`] before the cache sees it.

pub mod envelope;
mod http;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::error::TransportError;

pub use http::{AuthInterceptor, HttpTransport};

/// A boxed, sendable future.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Generic request primitive supplied by the host.
pub trait Transport: Send + Sync {
  /// Issue one request. `path` already carries its query string.
  fn send(&self, method: Method, path: &str, body: Option<Value>)
    -> BoxFuture<Result<Value, TransportError>>;
}
