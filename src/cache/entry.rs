//! Cache entry lifecycle.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::watch;

use super::tags::Tag;
use crate::error::CacheError;

/// Lifecycle state of a cached request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  /// Entry exists but no fetch has been started
  Uninitialized,
  /// First fetch in progress, no data yet
  Loading,
  /// Last fetch succeeded
  Succeeded,
  /// Last fetch failed; previous data, if any, is kept
  Failed,
}

/// What a consumer sees: `{data, status, error}` plus freshness flags.
#[derive(Debug, Clone)]
pub struct QuerySnapshot {
  pub data: Option<Value>,
  pub status: QueryStatus,
  pub error: Option<CacheError>,
  pub last_updated: Option<DateTime<Utc>>,
  /// Marked for refetch by an invalidation
  pub stale: bool,
  /// A transport call for this entry is in flight
  pub fetching: bool,
}

impl QuerySnapshot {
  pub fn uninitialized() -> Self {
    Self {
      data: None,
      status: QueryStatus::Uninitialized,
      error: None,
      last_updated: None,
      stale: false,
      fetching: false,
    }
  }

  pub fn is_success(&self) -> bool {
    self.status == QueryStatus::Succeeded
  }

  pub fn is_error(&self) -> bool {
    self.status == QueryStatus::Failed
  }

  pub fn is_loading(&self) -> bool {
    self.status == QueryStatus::Loading
  }
}

/// One cached request. Only the owning resource cache touches it.
#[derive(Debug)]
pub struct CacheEntry {
  data: Option<Value>,
  status: QueryStatus,
  error: Option<CacheError>,
  last_updated: Option<DateTime<Utc>>,
  stale: bool,
  fetching: bool,
  /// A write landed after the in-flight fetch went out
  refetch_pending: bool,
  provides_tags: HashSet<Tag>,
  notify: watch::Sender<QuerySnapshot>,
}

impl CacheEntry {
  pub fn new() -> Self {
    let (notify, _) = watch::channel(QuerySnapshot::uninitialized());
    Self {
      data: None,
      status: QueryStatus::Uninitialized,
      error: None,
      last_updated: None,
      stale: false,
      fetching: false,
      refetch_pending: false,
      provides_tags: HashSet::new(),
      notify,
    }
  }

  pub fn status(&self) -> QueryStatus {
    self.status
  }

  pub fn is_stale(&self) -> bool {
    self.stale
  }

  pub fn is_fetching(&self) -> bool {
    self.fetching
  }

  pub fn provides_tags(&self) -> &HashSet<Tag> {
    &self.provides_tags
  }

  /// A hit needs a fresh, successful entry.
  pub fn is_fresh_hit(&self) -> bool {
    self.status == QueryStatus::Succeeded && !self.stale && !self.fetching
  }

  pub fn needs_fetch(&self) -> bool {
    !self.fetching && (self.stale || self.status != QueryStatus::Succeeded)
  }

  pub fn begin_fetch(&mut self) {
    self.fetching = true;
    if self.data.is_none() {
      self.status = QueryStatus::Loading;
    }
    self.publish();
  }

  /// Mark for refetch. Returns false if already stale.
  pub fn mark_stale(&mut self) -> bool {
    if self.stale {
      return false;
    }
    self.stale = true;
    self.publish();
    true
  }

  /// The in-flight fetch cannot reflect a write; fetch once more after it.
  pub fn request_refetch(&mut self) {
    self.refetch_pending = true;
  }

  /// Clears the pending flag, returning whether it was set.
  pub fn take_refetch(&mut self) -> bool {
    std::mem::take(&mut self.refetch_pending)
  }

  /// With a refetch pending the entry stays stale and fetching, so
  /// watchers never see the outdated result as settled.
  pub fn succeed(&mut self, data: Value, tags: HashSet<Tag>, at: DateTime<Utc>) {
    self.data = Some(data);
    self.status = QueryStatus::Succeeded;
    self.error = None;
    self.last_updated = Some(at);
    self.stale = self.refetch_pending;
    self.fetching = self.refetch_pending;
    self.provides_tags = tags;
    self.publish();
  }

  /// Keeps the last good data so it can be shown next to the error.
  pub fn fail(&mut self, error: CacheError, at: DateTime<Utc>) {
    self.status = QueryStatus::Failed;
    self.error = Some(error);
    self.last_updated = Some(at);
    self.stale = self.refetch_pending;
    self.fetching = self.refetch_pending;
    self.publish();
  }

  /// A fetch that was marked as running never started.
  pub fn abandon_fetch(&mut self) {
    self.fetching = false;
    self.stale = false;
    self.refetch_pending = false;
    if self.status == QueryStatus::Loading {
      self.status = QueryStatus::Uninitialized;
    }
    self.publish();
  }

  /// Forget everything but keep watchers attached.
  pub fn reset(&mut self) {
    self.data = None;
    self.status = QueryStatus::Uninitialized;
    self.error = None;
    self.last_updated = None;
    self.stale = false;
    self.fetching = false;
    self.refetch_pending = false;
    self.provides_tags.clear();
    self.publish();
  }

  pub fn snapshot(&self) -> QuerySnapshot {
    QuerySnapshot {
      data: self.data.clone(),
      status: self.status,
      error: self.error.clone(),
      last_updated: self.last_updated,
      stale: self.stale,
      fetching: self.fetching,
    }
  }

  pub fn watch(&self) -> watch::Receiver<QuerySnapshot> {
    self.notify.subscribe()
  }

  fn publish(&self) {
    self.notify.send_replace(self.snapshot());
  }
}

impl Default for CacheEntry {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::TransportError;
  use serde_json::json;

  #[test]
  fn first_fetch_is_loading_refetch_keeps_data() {
    let mut entry = CacheEntry::new();
    assert_eq!(entry.status(), QueryStatus::Uninitialized);
    assert!(entry.needs_fetch());

    entry.begin_fetch();
    assert_eq!(entry.status(), QueryStatus::Loading);
    assert!(!entry.needs_fetch());

    entry.succeed(json!([1]), HashSet::new(), Utc::now());
    assert!(entry.is_fresh_hit());

    assert!(entry.mark_stale());
    assert!(!entry.mark_stale());
    entry.begin_fetch();
    let snap = entry.snapshot();
    assert_eq!(snap.status, QueryStatus::Succeeded);
    assert_eq!(snap.data, Some(json!([1])));
    assert!(snap.fetching);
  }

  #[test]
  fn failure_preserves_previous_data() {
    let mut entry = CacheEntry::new();
    entry.begin_fetch();
    entry.succeed(json!({"name": "Leo"}), HashSet::new(), Utc::now());
    entry.begin_fetch();
    entry.fail(TransportError::Timeout.into(), Utc::now());

    let snap = entry.snapshot();
    assert!(snap.is_error());
    assert_eq!(snap.data, Some(json!({"name": "Leo"})));
    assert_eq!(snap.error, Some(TransportError::Timeout.into()));
    assert!(entry.needs_fetch());
  }

  #[test]
  fn pending_refetch_keeps_entry_unsettled() {
    let mut entry = CacheEntry::new();
    entry.begin_fetch();
    entry.request_refetch();
    entry.succeed(json!(["before write"]), HashSet::new(), Utc::now());

    let snap = entry.snapshot();
    assert_eq!(snap.data, Some(json!(["before write"])));
    assert!(snap.fetching);
    assert!(snap.stale);
    assert!(!entry.is_fresh_hit());

    assert!(entry.take_refetch());
    assert!(!entry.take_refetch());
    entry.begin_fetch();
    entry.succeed(json!(["after write"]), HashSet::new(), Utc::now());
    assert!(entry.is_fresh_hit());
  }

  #[test]
  fn abandoned_fetch_is_not_left_running() {
    let mut entry = CacheEntry::new();
    entry.begin_fetch();
    entry.abandon_fetch();
    assert_eq!(entry.status(), QueryStatus::Uninitialized);
    assert!(!entry.is_fetching());
    assert!(entry.needs_fetch());
  }

  #[test]
  fn watchers_see_transitions() {
    let mut entry = CacheEntry::new();
    let rx = entry.watch();
    entry.begin_fetch();
    entry.succeed(json!(1), HashSet::new(), Utc::now());
    assert_eq!(rx.borrow().data, Some(json!(1)));
  }
}
