//! Realtime connection boundary.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;

use crate::error::ConnectionError;
use crate::transport::BoxFuture;

/// Callback for one server event. Receives the invocation arguments.
pub type EventHandler = Arc<dyn Fn(&[Value]) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
  Disconnected,
  Connecting,
  Connected,
  /// Link dropped; the provider is retrying
  Reconnecting,
  Disconnecting,
}

impl fmt::Display for ConnectionState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ConnectionState::Disconnected => "disconnected",
      ConnectionState::Connecting => "connecting",
      ConnectionState::Connected => "connected",
      ConnectionState::Reconnecting => "reconnecting",
      ConnectionState::Disconnecting => "disconnecting",
    };
    f.write_str(name)
  }
}

/// A persistent server connection delivering named events.
///
/// Several handlers may be registered for one event; `off` removes all of
/// them. Reconnection after a drop is the implementation's job.
pub trait HubConnection: Send + Sync {
  fn on(&self, event: &str, handler: EventHandler);

  fn off(&self, event: &str);

  /// Connect. A no-op when already connecting or connected.
  fn start(&self) -> BoxFuture<Result<(), ConnectionError>>;

  /// Disconnect. Safe to call when never started.
  fn stop(&self) -> BoxFuture<()>;

  fn state(&self) -> ConnectionState;

  fn watch_state(&self) -> watch::Receiver<ConnectionState>;
}
