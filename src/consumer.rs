//! Consumer-facing handles over the store.
//!
//! A [`QueryHandle`] is a mounted view of one cache entry: it subscribes on
//! creation, unsubscribes when dropped and reports every change. A
//! [`MutationTrigger`] runs one mutation endpoint and tracks the state of
//! its latest call.
//!
//! # Example
//!
//! ```ignore
//! let mut animals = use_query(&store, ResourceName::Animals, "getAnimals", json!({"pageSize": 10}))?;
//! while let Some(snapshot) = animals.changed().await {
//!     render(&snapshot);
//! }
//!
//! let create = use_mutation(&store, ResourceName::Animals, "createAnimals")?;
//! create.trigger(json!({"name": "Nala"})).await?;
//! ```

use serde_json::Value;
use tokio::sync::watch;

use crate::api::ResourceName;
use crate::cache::{CacheKey, MutationOutcome, QuerySnapshot, Subscription};
use crate::error::{CacheError, ValidationError};
use crate::store::GlobalStore;

/// Subscribe to `resource/endpoint(params)`.
pub fn use_query(
  store: &GlobalStore,
  resource: ResourceName,
  endpoint: &str,
  params: Value,
) -> Result<QueryHandle, CacheError> {
  let subscription = store.subscribe(resource, endpoint, params)?;
  Ok(QueryHandle { subscription })
}

pub struct QueryHandle {
  subscription: Subscription,
}

impl QueryHandle {
  pub fn key(&self) -> &CacheKey {
    self.subscription.key()
  }

  pub fn snapshot(&self) -> QuerySnapshot {
    self.subscription.snapshot()
  }

  /// Get the data if any fetch has succeeded, even if a later one failed.
  pub fn data(&self) -> Option<Value> {
    self.snapshot().data
  }

  pub fn is_loading(&self) -> bool {
    self.snapshot().is_loading()
  }

  pub fn is_success(&self) -> bool {
    self.snapshot().is_success()
  }

  pub fn is_error(&self) -> bool {
    self.snapshot().is_error()
  }

  /// Wait for the next change. `None` once the entry is gone.
  pub async fn changed(&mut self) -> Option<QuerySnapshot> {
    self.subscription.changed().await
  }

  /// Wait until the current fetch, if any, has finished.
  pub async fn settled(&mut self) -> Option<QuerySnapshot> {
    self.subscription.settled().await
  }

  /// Force a refetch. A no-op while one is running.
  pub fn refetch(&self) -> Result<bool, CacheError> {
    self.subscription.refetch()
  }
}

impl std::fmt::Debug for QueryHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryHandle")
      .field("key", self.key())
      .field("status", &self.snapshot().status)
      .finish_non_exhaustive()
  }
}

/// The state of the latest mutation call
#[derive(Debug, Clone, PartialEq)]
pub enum MutationState {
  /// Not triggered yet, or reset
  Idle,
  Pending,
  Success(Value),
  Error(CacheError),
}

impl MutationState {
  pub fn is_pending(&self) -> bool {
    matches!(self, MutationState::Pending)
  }

  pub fn data(&self) -> Option<&Value> {
    match self {
      MutationState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&CacheError> {
    match self {
      MutationState::Error(e) => Some(e),
      _ => None,
    }
  }
}

/// Bind a mutation endpoint. Fails up front for unknown endpoints and
/// for queries.
pub fn use_mutation(
  store: &GlobalStore,
  resource: ResourceName,
  endpoint: &str,
) -> Result<MutationTrigger, CacheError> {
  let declared = store.endpoints().get(resource, endpoint)?;
  if declared.is_query() {
    return Err(ValidationError::NotAMutation(endpoint.to_string()).into());
  }

  let (state, _) = watch::channel(MutationState::Idle);
  Ok(MutationTrigger {
    store: store.clone(),
    resource,
    endpoint: declared.name,
    state,
  })
}

pub struct MutationTrigger {
  store: GlobalStore,
  resource: ResourceName,
  endpoint: &'static str,
  state: watch::Sender<MutationState>,
}

impl MutationTrigger {
  pub async fn trigger(&self, body: Value) -> Result<MutationOutcome, CacheError> {
    self.state.send_replace(MutationState::Pending);
    let result = self.store.mutate(self.resource, self.endpoint, body).await;
    self.state.send_replace(match &result {
      Ok(outcome) => MutationState::Success(outcome.data.clone()),
      Err(e) => MutationState::Error(e.clone()),
    });
    result
  }

  pub fn state(&self) -> MutationState {
    self.state.borrow().clone()
  }

  pub fn watch(&self) -> watch::Receiver<MutationState> {
    self.state.subscribe()
  }

  pub fn reset(&self) {
    self.state.send_replace(MutationState::Idle);
  }
}

impl std::fmt::Debug for MutationTrigger {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("MutationTrigger")
      .field("resource", &self.resource)
      .field("endpoint", &self.endpoint)
      .field("state", &*self.state.borrow())
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  use serde_json::json;

  use crate::api::EndpointTable;
  use crate::cache::QueryStatus;
  use crate::persistence::MemoryKeyValueStore;
  use crate::testing::{FakeZoo, MockTransport};
  use crate::transport::Method;

  fn store(zoo: &FakeZoo) -> (GlobalStore, Arc<MockTransport>) {
    let transport = zoo.transport();
    let (token, _) = watch::channel(None);
    let store = GlobalStore::new(
      Arc::new(EndpointTable::standard().unwrap()),
      transport.clone(),
      Arc::new(MemoryKeyValueStore::new()),
      token,
      chrono::Duration::seconds(60),
    );
    (store, transport)
  }

  #[tokio::test]
  async fn query_handle_follows_the_entry() {
    let zoo = FakeZoo::new();
    let (store, transport) = store(&zoo);

    let mut handle = use_query(&store, ResourceName::Animals, "getAnimals", Value::Null).unwrap();
    let first = handle.settled().await.unwrap();
    assert_eq!(first.status, QueryStatus::Succeeded);

    let rename = use_mutation(&store, ResourceName::Animals, "updateAnimal").unwrap();
    rename.trigger(json!({"id": 1, "name": "Leonard"})).await.unwrap();
    assert!(rename.state().data().is_some());

    let refreshed = handle.settled().await.unwrap();
    assert_eq!(refreshed.data.unwrap()[0]["name"], "Leonard");
    assert_eq!(transport.count(Method::Get, "/api/Animals"), 2);
  }

  #[tokio::test]
  async fn dropping_the_handle_releases_the_subscription() {
    let zoo = FakeZoo::new();
    let (store, _) = store(&zoo);

    let mut handle = use_query(&store, ResourceName::News, "getNews", Value::Null).unwrap();
    handle.settled().await.unwrap();
    let key = handle.key().clone();
    assert_eq!(store.cache(ResourceName::News).subscriber_count(&key), 1);

    drop(handle);
    assert_eq!(store.cache(ResourceName::News).subscriber_count(&key), 0);
    assert!(store.cache(ResourceName::News).contains(&key));
  }

  #[tokio::test]
  async fn use_mutation_rejects_queries_and_unknown_names() {
    let zoo = FakeZoo::new();
    let (store, transport) = store(&zoo);

    let err = use_mutation(&store, ResourceName::Animals, "getAnimals").unwrap_err();
    assert!(matches!(err, CacheError::Validation(ValidationError::NotAMutation(_))));
    assert!(use_mutation(&store, ResourceName::Animals, "feedAnimals").is_err());
    assert!(transport.calls().is_empty());
  }

  #[tokio::test]
  async fn failed_trigger_records_error() {
    let zoo = FakeZoo::new();
    let (store, _) = store(&zoo);

    let update = use_mutation(&store, ResourceName::Animals, "updateAnimal").unwrap();
    assert_eq!(update.state(), MutationState::Idle);

    assert!(update.trigger(json!({"id": 99, "name": "Ghost"})).await.is_err());
    assert!(update.state().error().is_some());

    update.reset();
    assert_eq!(update.state(), MutationState::Idle);
  }
}
