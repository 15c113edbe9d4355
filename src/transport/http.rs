//! reqwest-backed transport.

use std::time::Duration;

use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;
use url::Url;

use super::envelope;
use super::{BoxFuture, Method, Transport};
use crate::config::ApiConfig;
use crate::error::TransportError;

/// Attaches auth and content headers to every request.
///
/// Reads the current access token from the store's token channel, so the
/// cache never has to know about sessions.
#[derive(Clone)]
pub struct AuthInterceptor {
  token: watch::Receiver<Option<String>>,
}

impl AuthInterceptor {
  pub fn new(token: watch::Receiver<Option<String>>) -> Self {
    Self { token }
  }

  /// An interceptor that never sends a token.
  pub fn anonymous() -> Self {
    let (_tx, rx) = watch::channel(None);
    Self { token: rx }
  }

  fn apply(&self, request: reqwest::RequestBuilder, has_body: bool) -> reqwest::RequestBuilder {
    let mut request = request.header(ACCEPT, HeaderValue::from_static("application/json"));
    if has_body {
      request = request.header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    match self.token.borrow().as_deref() {
      Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
      None => request,
    }
  }
}

/// HTTP client for the zoo API.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
  interceptor: AuthInterceptor,
}

impl HttpTransport {
  pub fn new(config: &ApiConfig, interceptor: AuthInterceptor) -> Result<Self, TransportError> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_millis(config.timeout_ms))
      .build()?;
    let mut base_url = Url::parse(&config.base_url)
      .map_err(|e| TransportError::Network(format!("Invalid base url {}: {}", config.base_url, e)))?;
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    Ok(Self {
      client,
      base_url,
      interceptor,
    })
  }

  /// Endpoint paths are relative to the base URL, path prefix included.
  fn url_for(&self, path: &str) -> Result<Url, TransportError> {
    self
      .base_url
      .join(path.trim_start_matches('/'))
      .map_err(|e| TransportError::Network(format!("Invalid path {}: {}", path, e)))
  }
}

impl Transport for HttpTransport {
  fn send(
    &self,
    method: Method,
    path: &str,
    body: Option<Value>,
  ) -> BoxFuture<Result<Value, TransportError>> {
    let url = self.url_for(path);
    let client = self.client.clone();
    let interceptor = self.interceptor.clone();

    Box::pin(async move {
      let url = url?;
      debug!(%method, %url, "Sending request");

      let request = match method {
        Method::Get => client.get(url),
        Method::Post => client.post(url),
        Method::Put => client.put(url),
        Method::Patch => client.patch(url),
        Method::Delete => client.delete(url),
      };
      let request = interceptor.apply(request, body.is_some());
      let request = match body {
        Some(body) => request.json(&body),
        None => request,
      };

      let response = request.send().await?;
      let status = response.status();
      let text = response.text().await?;

      if !status.is_success() {
        return Err(TransportError::from_status(status.as_u16(), &text));
      }
      if text.trim().is_empty() {
        return Ok(Value::Null);
      }

      let value: Value =
        serde_json::from_str(&text).map_err(|e| TransportError::Decode(e.to_string()))?;
      Ok(envelope::normalize(value))
    })
  }
}
