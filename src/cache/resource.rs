//! Per-resource request cache.
//!
//! Each resource family gets one `ResourceCache`: entries keyed by
//! (endpoint, normalized params), a tag index, and subscriber counts. All
//! cache state is mutated here and nowhere else.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use futures::future::{FutureExt, Shared};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::entry::{CacheEntry, QueryStatus, QuerySnapshot};
use super::index::TagIndex;
use super::keys::CacheKey;
use super::lock::mutex_lock;
use super::subscriptions::SubscriptionRegistry;
use super::tags::Tag;
use crate::api::{Endpoint, EndpointTable, ResourceName};
use crate::error::{CacheError, ValidationError};
use crate::transport::{BoxFuture, Transport};

const SOURCE: &str = "cache::resource";

type FetchOutcome = Result<Value, CacheError>;
type SharedFetch = Shared<BoxFuture<FetchOutcome>>;

/// Result of one `invalidate_tags` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvalidationReport {
  /// Subscribed entries now refetching in the background
  pub refetching: usize,
  /// Unsubscribed entries dropped without a network call
  pub evicted: usize,
  /// Entries whose running fetch already covers the invalidation
  pub coalesced: usize,
  /// Entries whose running fetch went out before the write; they are
  /// refetched or dropped once it lands
  pub deferred: usize,
}

impl InvalidationReport {
  pub fn merge(&mut self, other: InvalidationReport) {
    self.refetching += other.refetching;
    self.evicted += other.evicted;
    self.coalesced += other.coalesced;
    self.deferred += other.deferred;
  }

  pub fn touched(&self) -> usize {
    self.refetching + self.evicted + self.coalesced + self.deferred
  }
}

/// A successful mutation and the tags it invalidated.
#[derive(Debug, Clone)]
pub struct MutationOutcome {
  pub data: Value,
  pub invalidated: Vec<Tag>,
  pub report: InvalidationReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
  pub entries: usize,
  pub tags: usize,
  pub subscribers: usize,
  pub in_flight: usize,
}

/// A running fetch, stamped with the order it was sent in.
struct InFlight {
  fetch: SharedFetch,
  seq: u64,
}

#[derive(Default)]
struct CacheState {
  entries: HashMap<CacheKey, CacheEntry>,
  index: TagIndex,
  subscriptions: SubscriptionRegistry,
  in_flight: HashMap<CacheKey, InFlight>,
  /// Stamp of the most recently sent fetch
  fetch_seq: u64,
  /// Bumped by `reset`; fetches started under an older generation are
  /// not stored.
  generation: u64,
}

impl CacheState {
  fn evict(&mut self, key: &CacheKey) {
    self.entries.remove(key);
    self.index.remove_key(key);
    self.subscriptions.forget(key);
  }
}

struct Inner {
  resource: ResourceName,
  endpoints: Arc<EndpointTable>,
  transport: Arc<dyn Transport>,
  retention: Duration,
  state: Mutex<CacheState>,
}

/// Request cache for one resource family. Cheap to clone.
#[derive(Clone)]
pub struct ResourceCache {
  inner: Arc<Inner>,
}

impl ResourceCache {
  pub fn new(
    resource: ResourceName,
    endpoints: Arc<EndpointTable>,
    transport: Arc<dyn Transport>,
    retention: Duration,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        resource,
        endpoints,
        transport,
        retention,
        state: Mutex::new(CacheState::default()),
      }),
    }
  }

  pub fn resource(&self) -> ResourceName {
    self.inner.resource
  }

  /// Return a fresh entry, or fetch it.
  ///
  /// Concurrent callers for the same key share one transport call. A
  /// result that was discarded (fetched before a reset, or before a write
  /// that invalidated it) is never returned; the query waits for the fetch
  /// that replaced it.
  pub async fn query(&self, endpoint: &str, params: Value) -> Result<QuerySnapshot, CacheError> {
    let endpoint = self.inner.query_endpoint(endpoint)?;
    endpoint.validate_params(&params)?;
    let key = CacheKey::new(self.inner.resource, endpoint.name, &params);

    loop {
      let (fetch, generation) = {
        let mut state = mutex_lock(&self.inner.state, SOURCE, "query");
        let now = Utc::now();
        let entry = state.entries.entry(key.clone()).or_default();
        if entry.is_fresh_hit() {
          debug!(resource = %self.inner.resource, key = %key, "Cache hit");
          return Ok(entry.snapshot());
        }
        state.subscriptions.mark_idle(&key, now);
        let fetch = self.inner.start_fetch(&mut state, &key)?;
        (fetch, state.generation)
      };

      let _outcome = fetch.await;
      {
        let state = mutex_lock(&self.inner.state, SOURCE, "query");
        let settled = state
          .entries
          .get(&key)
          .filter(|e| state.generation == generation && !e.is_fetching());
        if let Some(entry) = settled {
          return Ok(entry.snapshot());
        }
      }
      debug!(key = %key, "Result superseded, waiting for the next fetch");
    }
  }

  /// Run a mutation, then invalidate its declared tags.
  ///
  /// Never cached. A failed mutation leaves the cache untouched.
  pub async fn mutate(&self, endpoint: &str, body: Value) -> Result<MutationOutcome, CacheError> {
    let endpoint = self.inner.mutation_endpoint(endpoint)?;
    let (path, sent) = endpoint.build_request(&body)?;

    let mark = self.fetch_mark();
    let data = match self.inner.transport.send(endpoint.method, &path, sent).await {
      Ok(data) => data,
      Err(err) => {
        warn!(
          resource = %self.inner.resource,
          endpoint = endpoint.name,
          error = %err,
          "Mutation failed"
        );
        return Err(err.into());
      }
    };

    let invalidated = endpoint.invalidated_tags(&body);
    info!(
      resource = %self.inner.resource,
      endpoint = endpoint.name,
      tags = ?invalidated.iter().map(Tag::to_string).collect::<Vec<_>>(),
      "Mutation succeeded"
    );
    let report = self.invalidate(&invalidated, Some(mark));

    Ok(MutationOutcome {
      data,
      invalidated,
      report,
    })
  }

  /// Stamp of the most recently sent fetch. Capture it before sending a
  /// write and pass it to [`invalidate_written`](Self::invalidate_written).
  pub fn fetch_mark(&self) -> u64 {
    mutex_lock(&self.inner.state, SOURCE, "fetch_mark").fetch_seq
  }

  /// Mark every entry under `tags` stale.
  ///
  /// Subscribed entries refetch in the background and keep their data
  /// visible meanwhile; unsubscribed ones are dropped. An entry that is
  /// already fetching absorbs the invalidation.
  pub fn invalidate_tags(&self, tags: &[Tag]) -> InvalidationReport {
    self.invalidate(tags, None)
  }

  /// Invalidate `tags` after a write that was sent when the fetch stamp
  /// was `mark`.
  ///
  /// Only fetches sent after the write absorb the invalidation. Older
  /// in-flight fetches may have read the server before the write, so their
  /// entries are refetched (or dropped, if unsubscribed) once they land.
  pub fn invalidate_written(&self, tags: &[Tag], mark: u64) -> InvalidationReport {
    self.invalidate(tags, Some(mark))
  }

  fn invalidate(&self, tags: &[Tag], written_at: Option<u64>) -> InvalidationReport {
    let mut report = InvalidationReport::default();
    let mut guard = mutex_lock(&self.inner.state, SOURCE, "invalidate_tags");
    let state = &mut *guard;

    let keys: BTreeSet<CacheKey> = tags.iter().flat_map(|tag| state.index.resolve(tag)).collect();

    for key in keys {
      let subscribed = state.subscriptions.is_subscribed(&key);
      let Some(entry) = state.entries.get_mut(&key) else {
        continue;
      };
      if entry.is_fetching() {
        let covered = match written_at {
          None => true,
          Some(mark) => state.in_flight.get(&key).is_some_and(|f| f.seq > mark),
        };
        if covered {
          report.coalesced += 1;
        } else {
          entry.request_refetch();
          report.deferred += 1;
        }
        continue;
      }

      if subscribed {
        match self.inner.start_fetch(state, &key) {
          Ok(_) => {
            if let Some(entry) = state.entries.get_mut(&key) {
              entry.mark_stale();
            }
            report.refetching += 1;
          }
          Err(err) => warn!(key = %key, error = %err, "Could not refetch stale entry"),
        }
      } else {
        state.evict(&key);
        report.evicted += 1;
      }
    }

    if report.touched() > 0 {
      info!(
        resource = %self.inner.resource,
        refetching = report.refetching,
        evicted = report.evicted,
        coalesced = report.coalesced,
        deferred = report.deferred,
        "Tags invalidated"
      );
    }
    report
  }

  /// Register a consumer for an entry, fetching it if needed.
  pub fn subscribe(&self, endpoint: &str, params: Value) -> Result<Subscription, CacheError> {
    let endpoint = self.inner.query_endpoint(endpoint)?;
    endpoint.validate_params(&params)?;
    let key = CacheKey::new(self.inner.resource, endpoint.name, &params);

    let mut state = mutex_lock(&self.inner.state, SOURCE, "subscribe");
    let count = state.subscriptions.subscribe(&key);
    let entry = state.entries.entry(key.clone()).or_default();
    let receiver = entry.watch();
    if entry.needs_fetch() {
      self.inner.start_fetch(&mut state, &key)?;
    }
    debug!(key = %key, subscribers = count, "Subscribed");

    Ok(Subscription {
      cache: self.clone(),
      key,
      receiver,
      active: true,
    })
  }

  fn release(&self, key: &CacheKey) {
    let mut state = mutex_lock(&self.inner.state, SOURCE, "release");
    let remaining = state.subscriptions.unsubscribe(key, Utc::now());
    debug!(key = %key, subscribers = remaining, "Unsubscribed");

    if remaining == 0 {
      let drop_now = state
        .entries
        .get(key)
        .map(|e| e.is_stale() && !e.is_fetching())
        .unwrap_or(false);
      if drop_now {
        state.evict(key);
      }
    }
  }

  /// Force a refetch unless one is already running.
  pub fn refetch(&self, key: &CacheKey) -> Result<bool, CacheError> {
    let mut state = mutex_lock(&self.inner.state, SOURCE, "refetch");
    if !state.entries.get(key).is_some_and(|e| !e.is_fetching()) {
      return Ok(false);
    }
    self.inner.start_fetch(&mut state, key)?;
    if let Some(entry) = state.entries.get_mut(key) {
      entry.mark_stale();
    }
    Ok(true)
  }

  /// Current snapshot without triggering a fetch.
  pub fn peek(&self, endpoint: &str, params: &Value) -> Option<QuerySnapshot> {
    let key = CacheKey::new(self.inner.resource, endpoint, params);
    let state = mutex_lock(&self.inner.state, SOURCE, "peek");
    state.entries.get(&key).map(CacheEntry::snapshot)
  }

  pub fn contains(&self, key: &CacheKey) -> bool {
    mutex_lock(&self.inner.state, SOURCE, "contains")
      .entries
      .contains_key(key)
  }

  pub fn subscriber_count(&self, key: &CacheKey) -> usize {
    mutex_lock(&self.inner.state, SOURCE, "subscriber_count")
      .subscriptions
      .count(key)
  }

  /// Keys currently registered under `tag`.
  pub fn keys_for_tag(&self, tag: &Tag) -> HashSet<CacheKey> {
    mutex_lock(&self.inner.state, SOURCE, "keys_for_tag")
      .index
      .resolve(tag)
  }

  /// Drop entries unsubscribed for longer than the retention window.
  pub fn collect_garbage(&self, now: DateTime<Utc>) -> usize {
    let mut state = mutex_lock(&self.inner.state, SOURCE, "collect_garbage");
    let expired: Vec<CacheKey> = state
      .entries
      .iter()
      .filter(|(key, entry)| {
        !entry.is_fetching()
          && state
            .subscriptions
            .is_expired(key, self.inner.retention, now)
      })
      .map(|(key, _)| key.clone())
      .collect();

    for key in &expired {
      state.evict(key);
    }
    if !expired.is_empty() {
      debug!(resource = %self.inner.resource, evicted = expired.len(), "Garbage collected");
    }
    expired.len()
  }

  /// Periodically run [`collect_garbage`](Self::collect_garbage).
  pub fn spawn_gc(&self, every: StdDuration) -> JoinHandle<()> {
    let cache = self.clone();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(every);
      ticker.tick().await;
      loop {
        ticker.tick().await;
        cache.collect_garbage(Utc::now());
      }
    })
  }

  /// Drop all data. Subscribed entries are emptied and fetched again;
  /// results of fetches started before the reset are discarded.
  pub fn reset(&self) {
    let mut state = mutex_lock(&self.inner.state, SOURCE, "reset");
    state.generation += 1;
    state.in_flight.clear();
    state.index.clear();
    state.subscriptions.clear_idle();

    let keys: Vec<CacheKey> = state.entries.keys().cloned().collect();
    for key in keys {
      if state.subscriptions.is_subscribed(&key) {
        if let Some(entry) = state.entries.get_mut(&key) {
          entry.reset();
        }
        if let Err(err) = self.inner.start_fetch(&mut state, &key) {
          warn!(key = %key, error = %err, "Could not refetch after reset");
        }
      } else {
        state.entries.remove(&key);
      }
    }
    info!(resource = %self.inner.resource, "Cache reset");
  }

  pub fn stats(&self) -> CacheStats {
    let state = mutex_lock(&self.inner.state, SOURCE, "stats");
    CacheStats {
      entries: state.entries.len(),
      tags: state.index.tag_count(),
      subscribers: state.subscriptions.total_subscribers(),
      in_flight: state.in_flight.len(),
    }
  }
}

impl Inner {
  fn query_endpoint(&self, name: &str) -> Result<&Endpoint, ValidationError> {
    let endpoint = self.endpoints.get(self.resource, name)?;
    if !endpoint.is_query() {
      return Err(ValidationError::NotAQuery(name.to_string()));
    }
    Ok(endpoint)
  }

  fn mutation_endpoint(&self, name: &str) -> Result<&Endpoint, ValidationError> {
    let endpoint = self.endpoints.get(self.resource, name)?;
    if endpoint.is_query() {
      return Err(ValidationError::NotAMutation(name.to_string()));
    }
    Ok(endpoint)
  }

  /// Join the in-flight fetch for `key`, or start one.
  ///
  /// The fetch is spawned so it completes and stores its result even if
  /// every caller stops waiting.
  fn start_fetch(
    self: &Arc<Self>,
    state: &mut CacheState,
    key: &CacheKey,
  ) -> Result<SharedFetch, ValidationError> {
    if let Some(existing) = state.in_flight.get(key) {
      debug!(key = %key, "Joining in-flight fetch");
      return Ok(existing.fetch.clone());
    }

    let endpoint = self.query_endpoint(key.endpoint())?;
    let params = key.params_value();
    let (path, body) = endpoint.build_request(&params)?;
    let tags = endpoint.provided_tags(&params);
    let request = self.transport.send(endpoint.method, &path, body);
    state.fetch_seq += 1;
    let seq = state.fetch_seq;
    // In-flight entries, first loads included, are reachable by invalidation
    state.index.register_all(key, tags.iter().cloned());

    if let Some(entry) = state.entries.get_mut(key) {
      entry.begin_fetch();
    }

    debug!(
      resource = %self.resource,
      key = %key,
      fingerprint = %key.fingerprint(),
      %path,
      seq,
      "Fetching"
    );

    let inner = Arc::clone(self);
    let fetch_key = key.clone();
    let generation = state.generation;
    let future: BoxFuture<FetchOutcome> = Box::pin(async move {
      let outcome = request.await.map_err(CacheError::from);
      inner.complete(&fetch_key, generation, tags, &outcome);
      outcome
    });

    let shared = future.shared();
    state.in_flight.insert(
      key.clone(),
      InFlight {
        fetch: shared.clone(),
        seq,
      },
    );
    tokio::spawn(shared.clone());
    Ok(shared)
  }

  fn complete(
    self: &Arc<Self>,
    key: &CacheKey,
    generation: u64,
    tags: HashSet<Tag>,
    outcome: &FetchOutcome,
  ) {
    let mut guard = mutex_lock(&self.state, SOURCE, "complete");
    let state = &mut *guard;
    if state.generation != generation {
      debug!(key = %key, "Discarding result fetched before reset");
      return;
    }
    state.in_flight.remove(key);

    let now = Utc::now();
    let entry = state.entries.entry(key.clone()).or_default();
    match outcome {
      Ok(data) => {
        entry.succeed(data.clone(), tags.clone(), now);
        state.index.register_all(key, tags);
        debug!(key = %key, "Fetch succeeded");
      }
      Err(err) => {
        entry.fail(err.clone(), now);
        warn!(resource = %self.resource, key = %key, error = %err, "Fetch failed");
      }
    }
    let again = entry.take_refetch();
    state.subscriptions.mark_idle(key, now);

    if !again {
      return;
    }
    if !state.subscriptions.is_subscribed(key) {
      debug!(key = %key, "Dropping entry fetched before a write");
      state.evict(key);
      return;
    }
    debug!(key = %key, "Refetching entry fetched before a write");
    if let Err(err) = self.start_fetch(state, key) {
      warn!(key = %key, error = %err, "Could not refetch after write");
      if let Some(entry) = state.entries.get_mut(key) {
        entry.abandon_fetch();
      }
    }
  }
}

/// A mounted consumer of one cache entry.
///
/// Dropping it unsubscribes. It never cancels an in-flight fetch.
pub struct Subscription {
  cache: ResourceCache,
  key: CacheKey,
  receiver: watch::Receiver<QuerySnapshot>,
  active: bool,
}

impl Subscription {
  pub fn key(&self) -> &CacheKey {
    &self.key
  }

  pub fn snapshot(&self) -> QuerySnapshot {
    self.receiver.borrow().clone()
  }

  /// Wait for the entry to change. `None` once the entry is gone.
  pub async fn changed(&mut self) -> Option<QuerySnapshot> {
    self.receiver.changed().await.ok()?;
    Some(self.receiver.borrow_and_update().clone())
  }

  /// Wait until a fetch has settled (succeeded or failed, not fetching).
  pub async fn settled(&mut self) -> Option<QuerySnapshot> {
    loop {
      let snapshot = self.receiver.borrow_and_update().clone();
      if !snapshot.fetching
        && matches!(snapshot.status, QueryStatus::Succeeded | QueryStatus::Failed)
      {
        return Some(snapshot);
      }
      self.receiver.changed().await.ok()?;
    }
  }

  pub fn refetch(&self) -> Result<bool, CacheError> {
    self.cache.refetch(&self.key)
  }

  pub fn unsubscribe(mut self) {
    self.release();
  }

  fn release(&mut self) {
    if self.active {
      self.active = false;
      self.cache.release(&self.key);
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.release();
  }
}

impl std::fmt::Debug for Subscription {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription")
      .field("key", &self.key)
      .field("active", &self.active)
      .finish_non_exhaustive()
  }
}
