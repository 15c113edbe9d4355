//! WebSocket hub client.
//!
//! Connects straight to the hub's WebSocket endpoint (no negotiate round
//! trip), passes the access token as the `access_token` query parameter and
//! speaks the JSON hub protocol from [`super::protocol`]. A dropped link is
//! retried on a fixed delay schedule before the client gives up.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use super::connection::{ConnectionState, EventHandler, HubConnection};
use super::protocol::{self, HubMessage};
use crate::cache::mutex_lock;
use crate::config::RealtimeConfig;
use crate::error::ConnectionError;
use crate::transport::BoxFuture;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);
const KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Why the read loop ended.
enum Exit {
  Stopped,
  Dropped { reason: String, reconnect: bool },
}

pub struct WsHubConnection {
  inner: Arc<HubInner>,
}

struct HubInner {
  url: Url,
  token: watch::Receiver<Option<String>>,
  reconnect_delays: Vec<Duration>,
  handlers: Mutex<HashMap<String, Vec<EventHandler>>>,
  state: watch::Sender<ConnectionState>,
  stop: watch::Sender<bool>,
  task: Mutex<Option<JoinHandle<()>>>,
}

impl WsHubConnection {
  pub fn new(
    config: &RealtimeConfig,
    token: watch::Receiver<Option<String>>,
  ) -> Result<Self, ConnectionError> {
    let url = websocket_url(&config.hub_url)?;
    let (state, _) = watch::channel(ConnectionState::Disconnected);
    let (stop, _) = watch::channel(false);

    Ok(Self {
      inner: Arc::new(HubInner {
        url,
        token,
        reconnect_delays: config
          .reconnect_delays_ms
          .iter()
          .map(|ms| Duration::from_millis(*ms))
          .collect(),
        handlers: Mutex::new(HashMap::new()),
        state,
        stop,
        task: Mutex::new(None),
      }),
    })
  }
}

/// Map an http(s) hub address onto its ws(s) equivalent.
fn websocket_url(raw: &str) -> Result<Url, ConnectionError> {
  let mut url = Url::parse(raw).map_err(|e| ConnectionError::InvalidUrl(format!("{raw}: {e}")))?;
  let scheme = match url.scheme() {
    "http" | "ws" => "ws",
    "https" | "wss" => "wss",
    other => {
      return Err(ConnectionError::InvalidUrl(format!(
        "unsupported scheme '{other}'"
      )))
    }
  };
  url
    .set_scheme(scheme)
    .map_err(|_| ConnectionError::InvalidUrl(raw.to_string()))?;
  Ok(url)
}

impl HubInner {
  fn connect_url(&self) -> Url {
    let mut url = self.url.clone();
    if let Some(token) = self.token.borrow().as_deref() {
      url.query_pairs_mut().append_pair("access_token", token);
    }
    url
  }

  async fn connect(&self) -> Result<(WsStream, Vec<HubMessage>), ConnectionError> {
    let url = self.connect_url();
    let (mut stream, _) = tokio_tungstenite::connect_async(url.as_str())
      .await
      .map_err(|e| ConnectionError::Connect(e.to_string()))?;

    stream
      .send(Message::text(protocol::handshake_request()))
      .await
      .map_err(|e| ConnectionError::Handshake(e.to_string()))?;

    let pending = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
      loop {
        match stream.next().await {
          Some(Ok(Message::Text(text))) => return protocol::parse_handshake(&text),
          Some(Ok(Message::Close(_))) | None => {
            return Err(ConnectionError::Closed(
              "closed during handshake".to_string(),
            ))
          }
          Some(Ok(_)) => continue,
          Some(Err(e)) => return Err(ConnectionError::Handshake(e.to_string())),
        }
      }
    })
    .await
    .map_err(|_| ConnectionError::Handshake("timed out".to_string()))??;

    Ok((stream, pending))
  }

  fn dispatch(&self, target: &str, arguments: &[Value]) {
    let handlers = mutex_lock(&self.handlers, "realtime.hub", "dispatch")
      .get(&target.to_lowercase())
      .cloned()
      .unwrap_or_default();

    if handlers.is_empty() {
      debug!(event = target, "No handler for hub event");
      return;
    }
    for handler in handlers {
      handler(arguments);
    }
  }

  fn dispatch_all(&self, messages: Vec<HubMessage>) {
    for message in messages {
      if let HubMessage::Invocation { target, arguments } = message {
        self.dispatch(&target, &arguments);
      }
    }
  }

  fn stopped(&self) -> bool {
    *self.stop.borrow()
  }

  /// Read frames until the link drops or `stop` is requested.
  async fn pump(&self, stream: &mut WsStream) -> Exit {
    let mut stop = self.stop.subscribe();
    if *stop.borrow_and_update() {
      return Exit::Stopped;
    }

    let mut keep_alive = tokio::time::interval(KEEP_ALIVE);
    keep_alive.tick().await;

    loop {
      tokio::select! {
        changed = stop.changed() => {
          if changed.is_err() || *stop.borrow() {
            return Exit::Stopped;
          }
        }
        _ = keep_alive.tick() => {
          if let Err(e) = stream.send(Message::text(protocol::ping())).await {
            return Exit::Dropped { reason: e.to_string(), reconnect: true };
          }
        }
        message = stream.next() => match message {
          Some(Ok(Message::Text(text))) => {
            for parsed in protocol::parse_frame(&text) {
              match parsed {
                Ok(HubMessage::Invocation { target, arguments }) => {
                  self.dispatch(&target, &arguments)
                }
                Ok(HubMessage::Close { error, allow_reconnect }) => {
                  return Exit::Dropped {
                    reason: error.unwrap_or_else(|| "server closed the connection".to_string()),
                    reconnect: allow_reconnect,
                  };
                }
                Ok(HubMessage::Ping) | Ok(HubMessage::Other(_)) => {}
                Err(e) => warn!(error = %e, "Undecodable hub message"),
              }
            }
          }
          Some(Ok(Message::Close(_))) | None => {
            return Exit::Dropped { reason: "socket closed".to_string(), reconnect: true };
          }
          Some(Ok(_)) => {}
          Some(Err(e)) => {
            return Exit::Dropped { reason: e.to_string(), reconnect: true };
          }
        }
      }
    }
  }

  /// Walk the delay schedule. `None` when it is exhausted or stop was
  /// requested.
  async fn reconnect(&self) -> Option<WsStream> {
    let mut stop = self.stop.subscribe();
    for (attempt, delay) in self.reconnect_delays.iter().enumerate() {
      tokio::select! {
        _ = tokio::time::sleep(*delay) => {}
        _ = stop.changed() => {}
      }
      if self.stopped() {
        return None;
      }

      match self.connect().await {
        Ok((stream, pending)) => {
          self.dispatch_all(pending);
          return Some(stream);
        }
        Err(e) => warn!(attempt = attempt + 1, error = %e, "Hub reconnect attempt failed"),
      }
    }
    None
  }

  async fn run(self: Arc<Self>, mut stream: WsStream) {
    loop {
      match self.pump(&mut stream).await {
        Exit::Stopped => {
          let _ = stream.close(None).await;
          return;
        }
        Exit::Dropped { reason, reconnect } => {
          if !reconnect || self.reconnect_delays.is_empty() {
            warn!(%reason, "Hub connection closed");
            self.state.send_replace(ConnectionState::Disconnected);
            return;
          }

          warn!(%reason, "Hub connection lost, reconnecting");
          self.state.send_replace(ConnectionState::Reconnecting);
          match self.reconnect().await {
            Some(next) => {
              stream = next;
              self.state.send_replace(ConnectionState::Connected);
              info!(url = %self.url, "Hub reconnected");
            }
            None => {
              if !self.stopped() {
                warn!("Hub reconnect schedule exhausted, staying offline");
              }
              self.state.send_replace(ConnectionState::Disconnected);
              return;
            }
          }
        }
      }
    }
  }
}

impl HubConnection for WsHubConnection {
  fn on(&self, event: &str, handler: EventHandler) {
    mutex_lock(&self.inner.handlers, "realtime.hub", "on")
      .entry(event.to_lowercase())
      .or_default()
      .push(handler);
  }

  fn off(&self, event: &str) {
    mutex_lock(&self.inner.handlers, "realtime.hub", "off").remove(&event.to_lowercase());
  }

  fn start(&self) -> BoxFuture<Result<(), ConnectionError>> {
    let inner = Arc::clone(&self.inner);
    Box::pin(async move {
      let claimed = inner.state.send_if_modified(|state| {
        if *state == ConnectionState::Disconnected {
          *state = ConnectionState::Connecting;
          true
        } else {
          false
        }
      });
      if !claimed {
        let state = *inner.state.borrow();
        debug!(%state, "Hub already started");
        return Ok(());
      }

      inner.stop.send_replace(false);
      let (stream, pending) = match inner.connect().await {
        Ok(connected) => connected,
        Err(e) => {
          inner.state.send_replace(ConnectionState::Disconnected);
          return Err(e);
        }
      };

      if inner.stopped() {
        inner.state.send_replace(ConnectionState::Disconnected);
        return Ok(());
      }

      inner.state.send_replace(ConnectionState::Connected);
      info!(url = %inner.url, "Hub connected");
      inner.dispatch_all(pending);

      let task = tokio::spawn(Arc::clone(&inner).run(stream));
      *mutex_lock(&inner.task, "realtime.hub", "start") = Some(task);
      Ok(())
    })
  }

  fn stop(&self) -> BoxFuture<()> {
    let inner = Arc::clone(&self.inner);
    Box::pin(async move {
      inner.stop.send_replace(true);
      let task = mutex_lock(&inner.task, "realtime.hub", "stop").take();

      if let Some(task) = task {
        inner.state.send_replace(ConnectionState::Disconnecting);
        if let Err(e) = task.await {
          warn!(error = %e, "Hub task ended abnormally");
        }
      }
      inner.state.send_replace(ConnectionState::Disconnected);
    })
  }

  fn state(&self) -> ConnectionState {
    *self.inner.state.borrow()
  }

  fn watch_state(&self) -> watch::Receiver<ConnectionState> {
    self.inner.state.subscribe()
  }
}
