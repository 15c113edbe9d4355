//! Active consumer tracking per cache entry.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use super::keys::CacheKey;

/// Counts mounted consumers per key and remembers when each key lost its
/// last one, which drives eviction after the retention window.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
  counts: HashMap<CacheKey, usize>,
  idle_since: HashMap<CacheKey, DateTime<Utc>>,
}

impl SubscriptionRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns the new subscriber count.
  pub fn subscribe(&mut self, key: &CacheKey) -> usize {
    self.idle_since.remove(key);
    let count = self.counts.entry(key.clone()).or_insert(0);
    *count += 1;
    *count
  }

  /// Returns the new subscriber count, never below zero.
  pub fn unsubscribe(&mut self, key: &CacheKey, now: DateTime<Utc>) -> usize {
    let remaining = match self.counts.get_mut(key) {
      Some(count) if *count > 1 => {
        *count -= 1;
        *count
      }
      _ => {
        self.counts.remove(key);
        0
      }
    };
    if remaining == 0 {
      self.idle_since.entry(key.clone()).or_insert(now);
    }
    remaining
  }

  pub fn count(&self, key: &CacheKey) -> usize {
    self.counts.get(key).copied().unwrap_or(0)
  }

  pub fn is_subscribed(&self, key: &CacheKey) -> bool {
    self.count(key) > 0
  }

  /// Start the idle clock for an entry nobody has subscribed to.
  pub fn mark_idle(&mut self, key: &CacheKey, now: DateTime<Utc>) {
    if !self.is_subscribed(key) {
      self.idle_since.entry(key.clone()).or_insert(now);
    }
  }

  /// Whether `key` has had no subscribers for longer than `retention`.
  pub fn is_expired(&self, key: &CacheKey, retention: Duration, now: DateTime<Utc>) -> bool {
    if self.is_subscribed(key) {
      return false;
    }
    self
      .idle_since
      .get(key)
      .map(|since| now - *since >= retention)
      .unwrap_or(false)
  }

  /// Drop idle bookkeeping for an evicted entry. Live counts are kept:
  /// a subscriber may still be mounted on a key whose entry was reset.
  pub fn forget(&mut self, key: &CacheKey) {
    self.idle_since.remove(key);
  }

  pub fn clear_idle(&mut self) {
    self.idle_since.clear();
  }

  pub fn total_subscribers(&self) -> usize {
    self.counts.values().sum()
  }
}
