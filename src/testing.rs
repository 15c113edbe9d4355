//! In-memory collaborators for unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::sync::watch;

use crate::error::{ConnectionError, TransportError};
use crate::realtime::{ConnectionState, EventHandler, HubConnection};
use crate::transport::{BoxFuture, Method, Transport};

type Responder = dyn Fn(Method, &str, Option<&Value>) -> Result<Value, TransportError> + Send + Sync;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
  pub method: Method,
  pub path: String,
  pub body: Option<Value>,
}

/// Transport that answers from a closure and records every call.
///
/// Responses are computed when the request resolves, so a held request sees
/// server state as of its release, unless `answer_at_send()` is set, in
/// which case the server state is read when the request goes out.
/// `hold()` keeps every request pending until `release()`; `hold_only`
/// does the same for one method.
pub struct MockTransport {
  calls: Mutex<Vec<RecordedCall>>,
  responder: Arc<Responder>,
  gate: watch::Sender<bool>,
  held_method: Mutex<Option<Method>>,
  at_send: Mutex<bool>,
}

impl MockTransport {
  pub fn new<F>(responder: F) -> Arc<Self>
  where
    F: Fn(Method, &str, Option<&Value>) -> Result<Value, TransportError> + Send + Sync + 'static,
  {
    let (gate, _) = watch::channel(true);
    Arc::new(Self {
      calls: Mutex::new(Vec::new()),
      responder: Arc::new(responder),
      gate,
      held_method: Mutex::new(None),
      at_send: Mutex::new(false),
    })
  }

  pub fn answer_at_send(&self) {
    *self.at_send.lock().unwrap() = true;
  }

  pub fn hold(&self) {
    *self.held_method.lock().unwrap() = None;
    self.gate.send_replace(false);
  }

  pub fn hold_only(&self, method: Method) {
    *self.held_method.lock().unwrap() = Some(method);
    self.gate.send_replace(false);
  }

  pub fn release(&self) {
    self.gate.send_replace(true);
  }

  pub fn calls(&self) -> Vec<RecordedCall> {
    self.calls.lock().unwrap().clone()
  }

  /// Calls whose path starts with `prefix` and use `method`.
  pub fn count(&self, method: Method, prefix: &str) -> usize {
    self
      .calls()
      .iter()
      .filter(|c| c.method == method && c.path.starts_with(prefix))
      .count()
  }
}

impl Transport for MockTransport {
  fn send(
    &self,
    method: Method,
    path: &str,
    body: Option<Value>,
  ) -> BoxFuture<Result<Value, TransportError>> {
    self.calls.lock().unwrap().push(RecordedCall {
      method,
      path: path.to_string(),
      body: body.clone(),
    });
    let responder = Arc::clone(&self.responder);
    let mut gate = self.gate.subscribe();
    let gated = self.held_method.lock().unwrap().map_or(true, |held| held == method);
    let answered = if *self.at_send.lock().unwrap() {
      Some(responder(method, path, body.as_ref()))
    } else {
      None
    };
    let path = path.to_string();
    Box::pin(async move {
      while gated {
        let open = *gate.borrow_and_update();
        if open || gate.changed().await.is_err() {
          break;
        }
      }
      answered.unwrap_or_else(|| responder(method, &path, body.as_ref()))
    })
  }
}

/// A fake zoo API holding animals, news and orders in memory.
#[derive(Clone, Default)]
pub struct FakeZoo {
  pub animals: Arc<Mutex<Vec<Value>>>,
  pub news: Arc<Mutex<Vec<Value>>>,
  pub orders: Arc<Mutex<HashMap<String, Value>>>,
  pub fail_animals: Arc<Mutex<bool>>,
}

impl FakeZoo {
  pub fn new() -> Self {
    let zoo = Self::default();
    zoo.animals.lock().unwrap().push(json!({"id": 1, "name": "Leo"}));
    zoo.news.lock().unwrap().push(json!({"id": 1, "title": "Opening hours"}));
    zoo
  }

  pub fn transport(&self) -> Arc<MockTransport> {
    let zoo = self.clone();
    MockTransport::new(move |method, path, body| zoo.respond(method, path, body))
  }

  pub fn animal_names(&self) -> Vec<String> {
    self
      .animals
      .lock()
      .unwrap()
      .iter()
      .filter_map(|a| a["name"].as_str().map(String::from))
      .collect()
  }

  fn respond(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value, TransportError> {
    let route = path.split('?').next().unwrap_or(path);
    match (method, route) {
      (Method::Get, "/api/Animals") => {
        if *self.fail_animals.lock().unwrap() {
          return Err(TransportError::from_status(503, "maintenance"));
        }
        Ok(Value::Array(self.animals.lock().unwrap().clone()))
      }
      (Method::Post, "/api/Animals") => {
        let mut animals = self.animals.lock().unwrap();
        let created = match body {
          Some(Value::Array(items)) => items.clone(),
          Some(item) => vec![item.clone()],
          None => Vec::new(),
        };
        for mut item in created {
          let id = animals.len() as u64 + 1;
          item["id"] = json!(id);
          animals.push(item);
        }
        Ok(json!({"created": animals.len()}))
      }
      (Method::Put, p) if p.starts_with("/api/Animals/") => {
        let id: u64 = p["/api/Animals/".len()..]
          .parse()
          .map_err(|_| TransportError::from_status(400, "bad id"))?;
        let mut animals = self.animals.lock().unwrap();
        let animal = animals
          .iter_mut()
          .find(|a| a["id"] == json!(id))
          .ok_or_else(|| TransportError::from_status(404, "no such animal"))?;
        if let Some(name) = body.and_then(|b| b.get("name")) {
          animal["name"] = name.clone();
        }
        Ok(animal.clone())
      }
      (Method::Post, p) if p.starts_with("/api/Animals/") && p.ends_with("/adopt") => {
        let mut news = self.news.lock().unwrap();
        let id = news.len() as u64 + 1;
        news.push(json!({"id": id, "title": "New adoption"}));
        Ok(json!({"adopted": true}))
      }
      (Method::Get, "/api/News") =>Ok(Value::Array(self.news.lock().unwrap().clone())),
      (Method::Get, p) if p.starts_with("/api/Orders/") => {
        let id = &p["/api/Orders/".len()..];
        self
          .orders
          .lock()
          .unwrap()
          .get(id)
          .cloned()
          .ok_or_else(|| TransportError::from_status(404, "no such order"))
      }
      (Method::Get, "/api/Orders") => {
        Ok(Value::Array(self.orders.lock().unwrap().values().cloned().collect()))
      }
      (Method::Post, "/api/Auth/login") | (Method::Post, "/api/Auth/verify-otp") => Ok(json!({
        "accessToken": "access-1",
        "refreshToken": "refresh-1",
        "role": "Customer",
        "userId": "u-1",
        "email": body.and_then(|b| b.get("email")).cloned().unwrap_or(Value::Null),
        "fullName": "Ada Keeper"
      })),
      (Method::Get, "/api/Users/profile") => Ok(json!({"userId": "u-1", "fullName": "Ada Keeper"})),
      _ => Err(TransportError::from_status(404, path)),
    }
  }
}

/// Hub connection driven by the test: `emit` delivers a server event to the
/// registered handlers, `drop_link`/`restore_link` walk the reconnect states.
pub struct MockHub {
  handlers: Mutex<HashMap<String, Vec<EventHandler>>>,
  state: watch::Sender<ConnectionState>,
  starts: Mutex<usize>,
  fail_start: Mutex<bool>,
}

impl MockHub {
  pub fn new() -> Arc<Self> {
    let (state, _) = watch::channel(ConnectionState::Disconnected);
    Arc::new(Self {
      handlers: Mutex::new(HashMap::new()),
      state,
      starts: Mutex::new(0),
      fail_start: Mutex::new(false),
    })
  }

  pub fn fail_next_start(&self) {
    *self.fail_start.lock().unwrap() = true;
  }

  /// Connection attempts that actually opened a link.
  pub fn starts(&self) -> usize {
    *self.starts.lock().unwrap()
  }

  pub fn handler_count(&self, event: &str) -> usize {
    self
      .handlers
      .lock()
      .unwrap()
      .get(event)
      .map_or(0, Vec::len)
  }

  pub fn emit(&self, event: &str, arguments: &[Value]) {
    let handlers = self.handlers.lock().unwrap().get(event).cloned().unwrap_or_default();
    for handler in handlers {
      handler(arguments);
    }
  }

  pub fn drop_link(&self) {
    self.state.send_replace(ConnectionState::Reconnecting);
  }

  pub fn restore_link(&self) {
    self.state.send_replace(ConnectionState::Connected);
  }
}

impl HubConnection for MockHub {
  fn on(&self, event: &str, handler: EventHandler) {
    self
      .handlers
      .lock()
      .unwrap()
      .entry(event.to_string())
      .or_default()
      .push(handler);
  }

  fn off(&self, event: &str) {
    self.handlers.lock().unwrap().remove(event);
  }

  fn start(&self) -> BoxFuture<Result<(), ConnectionError>> {
    let result = if std::mem::take(&mut *self.fail_start.lock().unwrap()) {
      Err(ConnectionError::Connect("connection refused".to_string()))
    } else {
      if *self.state.borrow() == ConnectionState::Disconnected {
        *self.starts.lock().unwrap() += 1;
        self.state.send_replace(ConnectionState::Connected);
      }
      Ok(())
    };
    Box::pin(async move { result })
  }

  fn stop(&self) -> BoxFuture<()> {
    self.state.send_replace(ConnectionState::Disconnected);
    Box::pin(async {})
  }

  fn state(&self) -> ConnectionState {
    *self.state.borrow()
  }

  fn watch_state(&self) -> watch::Receiver<ConnectionState> {
    self.state.subscribe()
  }
}
