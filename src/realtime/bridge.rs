//! Server events to tag invalidations.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connection::{ConnectionState, HubConnection};
use crate::cache::{mutex_lock, Tag, TagKind};

/// Server event name and the resource family it invalidates.
pub const EVENT_TABLE: [(&str, TagKind); 7] = [
  ("AnimalChanged", TagKind::Animals),
  ("EventChanged", TagKind::Events),
  ("HabitatChanged", TagKind::Habitats),
  ("LocationChanged", TagKind::Locations),
  ("NewsChanged", TagKind::News),
  ("ProductChanged", TagKind::Products),
  ("TicketChanged", TagKind::Tickets),
];

/// One server event, translated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
  pub event: &'static str,
  pub tags: Vec<Tag>,
}

pub fn tags_for_event(event: &str) -> Option<Vec<Tag>> {
  EVENT_TABLE
    .iter()
    .find(|(name, _)| *name == event)
    .map(|(_, kind)| vec![Tag::list(*kind)])
}

/// Owns the process's hub connection and forwards every known server event
/// as an [`Invalidation`] on an unbounded channel, in receipt order.
pub struct RealtimeBridge {
  connection: Arc<dyn HubConnection>,
  sink: mpsc::UnboundedSender<Invalidation>,
  watcher: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeBridge {
  pub fn new(connection: Arc<dyn HubConnection>, sink: mpsc::UnboundedSender<Invalidation>) -> Self {
    Self {
      connection,
      sink,
      watcher: Mutex::new(None),
    }
  }

  /// Bridge plus the receiving end the store pumps.
  pub fn channel(connection: Arc<dyn HubConnection>) -> (Self, mpsc::UnboundedReceiver<Invalidation>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self::new(connection, tx), rx)
  }

  pub fn state(&self) -> ConnectionState {
    self.connection.state()
  }

  /// Register one handler per table event. Existing handlers are removed
  /// first, so calling this again never doubles delivery.
  pub fn attach(&self) {
    attach_to(self.connection.as_ref(), &self.sink);
  }

  pub fn detach(&self) {
    for (event, _) in EVENT_TABLE {
      self.connection.off(event);
    }
  }

  /// Attach handlers and connect. A failed connection is logged and the
  /// app carries on with cached data; the returned state says which.
  pub async fn start(&self) -> ConnectionState {
    self.attach();
    self.ensure_watcher();

    match self.connection.start().await {
      Ok(()) => info!(state = %self.connection.state(), "Realtime bridge started"),
      Err(e) => warn!(error = %e, "Realtime connection failed, continuing without live updates"),
    }
    self.connection.state()
  }

  /// Detach handlers and close the connection. Safe when never started.
  pub async fn stop(&self) {
    if let Some(watcher) = mutex_lock(&self.watcher, "realtime.bridge", "stop").take() {
      watcher.abort();
    }
    self.detach();
    self.connection.stop().await;
    debug!("Realtime bridge stopped");
  }

  /// Re-attach whenever the connection comes back after a drop.
  fn ensure_watcher(&self) {
    let mut slot = mutex_lock(&self.watcher, "realtime.bridge", "watch");
    if slot.is_some() {
      return;
    }

    let connection = Arc::clone(&self.connection);
    let sink = self.sink.clone();
    let mut states = connection.watch_state();
    *slot = Some(tokio::spawn(async move {
      let mut previous = *states.borrow_and_update();
      while states.changed().await.is_ok() {
        let current = *states.borrow_and_update();
        if current == ConnectionState::Connected && previous != ConnectionState::Connected {
          debug!(from = %previous, "Hub connected, attaching handlers");
          attach_to(connection.as_ref(), &sink);
        }
        previous = current;
      }
    }));
  }
}

impl Drop for RealtimeBridge {
  fn drop(&mut self) {
    if let Some(watcher) = mutex_lock(&self.watcher, "realtime.bridge", "drop").take() {
      watcher.abort();
    }
  }
}

fn attach_to(connection: &dyn HubConnection, sink: &mpsc::UnboundedSender<Invalidation>) {
  for (event, _) in EVENT_TABLE {
    connection.off(event);

    let sink = sink.clone();
    connection.on(
      event,
      Arc::new(move |_: &[Value]| {
        debug!(event, "Hub event received");
        let Some(tags) = tags_for_event(event) else {
          return;
        };
        let message = Invalidation { event, tags };
        if sink.send(message).is_err() {
          debug!(event, "Invalidation receiver gone, event dropped");
        }
      }),
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::MockHub;
  use serde_json::json;

  #[test]
  fn table_maps_events_to_list_tags() {
    assert_eq!(
      tags_for_event("AnimalChanged"),
      Some(vec![Tag::list(TagKind::Animals)])
    );
    assert_eq!(
      tags_for_event("TicketChanged"),
      Some(vec![Tag::list(TagKind::Tickets)])
    );
    assert_eq!(tags_for_event("OrderChanged"), None);
  }

  #[tokio::test]
  async fn attaching_twice_delivers_once() {
    let hub = MockHub::new();
    let (bridge, mut rx) = RealtimeBridge::channel(hub.clone());

    bridge.attach();
    bridge.attach();
    hub.emit("AnimalChanged", &[json!({"id": 4})]);

    let message = rx.recv().await.unwrap();
    assert_eq!(message.event, "AnimalChanged");
    assert_eq!(message.tags, vec![Tag::list(TagKind::Animals)]);
    assert!(rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn every_table_event_forwards_its_tags() {
    let hub = MockHub::new();
    let (bridge, mut rx) = RealtimeBridge::channel(hub.clone());
    bridge.attach();

    for (event, kind) in EVENT_TABLE {
      hub.emit(event, &[]);
      let message = rx.recv().await.unwrap();
      assert_eq!(message.event, event);
      assert_eq!(message.tags, vec![Tag::list(kind)]);
    }
    assert!(rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn events_arrive_in_receipt_order() {
    let hub = MockHub::new();
    let (bridge, mut rx) = RealtimeBridge::channel(hub.clone());
    bridge.start().await;

    hub.emit("NewsChanged", &[]);
    hub.emit("AnimalChanged", &[]);
    hub.emit("Unrelated", &[]);
    hub.emit("HabitatChanged", &[]);

    let events: Vec<&str> = [
      rx.recv().await.unwrap(),
      rx.recv().await.unwrap(),
      rx.recv().await.unwrap(),
    ]
    .iter()
    .map(|m| m.event)
    .collect();
    assert_eq!(events, ["NewsChanged", "AnimalChanged", "HabitatChanged"]);
  }

  #[tokio::test]
  async fn stop_without_start_is_fine() {
    let hub = MockHub::new();
    let (bridge, _rx) = RealtimeBridge::channel(hub.clone());
    bridge.stop().await;
    bridge.stop().await;
    assert_eq!(bridge.state(), ConnectionState::Disconnected);
  }

  #[tokio::test]
  async fn repeated_start_reuses_connection() {
    let hub = MockHub::new();
    let (bridge, _rx) = RealtimeBridge::channel(hub.clone());
    assert_eq!(bridge.start().await, ConnectionState::Connected);
    assert_eq!(bridge.start().await, ConnectionState::Connected);
    assert_eq!(hub.starts(), 1);
    assert_eq!(hub.handler_count("AnimalChanged"), 1);
  }

  #[tokio::test]
  async fn failed_start_is_not_fatal() {
    let hub = MockHub::new();
    hub.fail_next_start();
    let (bridge, _rx) = RealtimeBridge::channel(hub.clone());
    assert_eq!(bridge.start().await, ConnectionState::Disconnected);
    assert_eq!(bridge.start().await, ConnectionState::Connected);
  }

  #[tokio::test]
  async fn stop_detaches_handlers() {
    let hub = MockHub::new();
    let (bridge, mut rx) = RealtimeBridge::channel(hub.clone());
    bridge.start().await;
    bridge.stop().await;

    hub.emit("AnimalChanged", &[]);
    assert_eq!(hub.handler_count("AnimalChanged"), 0);
    assert!(rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn handlers_come_back_after_reconnect() {
    let hub = MockHub::new();
    let (bridge, mut rx) = RealtimeBridge::channel(hub.clone());
    bridge.start().await;

    hub.drop_link();
    tokio::task::yield_now().await;
    // The provider lost its registrations with the old link.
    for (event, _) in EVENT_TABLE {
      hub.off(event);
    }
    hub.restore_link();

    for _ in 0..10 {
      if hub.handler_count("NewsChanged") == 1 {
        break;
      }
      tokio::task::yield_now().await;
    }
    assert_eq!(hub.handler_count("NewsChanged"), 1);

    hub.emit("NewsChanged", &[]);
    assert_eq!(rx.recv().await.unwrap().tags, vec![Tag::list(TagKind::News)]);
  }
}
