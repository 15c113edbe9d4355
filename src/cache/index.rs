//! Bidirectional tag index.
//!
//! Tracks which cache entries depend on which tags so an invalidation can
//! find every affected entry, and so evicting an entry can clean up every
//! bucket it was registered under.

use std::collections::{HashMap, HashSet};

use super::keys::CacheKey;
use super::tags::Tag;

/// Tag → keys and key → tags mappings.
///
/// Invariant: `key` is in `tag_to_keys[tag]` iff `tag` is in
/// `key_to_tags[key]`. Empty buckets are removed.
#[derive(Debug, Default)]
pub struct TagIndex {
  tag_to_keys: HashMap<Tag, HashSet<CacheKey>>,
  key_to_tags: HashMap<CacheKey, HashSet<Tag>>,
}

impl TagIndex {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&mut self, tag: Tag, key: CacheKey) {
    self
      .key_to_tags
      .entry(key.clone())
      .or_default()
      .insert(tag.clone());
    self.tag_to_keys.entry(tag).or_default().insert(key);
  }

  /// Replace the full tag set of `key`.
  pub fn register_all(&mut self, key: &CacheKey, tags: impl IntoIterator<Item = Tag>) {
    self.remove_key(key);
    for tag in tags {
      self.register(tag, key.clone());
    }
  }

  pub fn unregister(&mut self, tag: &Tag, key: &CacheKey) {
    if let Some(keys) = self.tag_to_keys.get_mut(tag) {
      keys.remove(key);
      if keys.is_empty() {
        self.tag_to_keys.remove(tag);
      }
    }
    if let Some(tags) = self.key_to_tags.get_mut(key) {
      tags.remove(tag);
      if tags.is_empty() {
        self.key_to_tags.remove(key);
      }
    }
  }

  /// Drop `key` from every bucket it is registered under.
  ///
  /// Returns the tags it was registered with.
  pub fn remove_key(&mut self, key: &CacheKey) -> HashSet<Tag> {
    let tags = self.key_to_tags.remove(key).unwrap_or_default();
    for tag in &tags {
      if let Some(keys) = self.tag_to_keys.get_mut(tag) {
        keys.remove(key);
        if keys.is_empty() {
          self.tag_to_keys.remove(tag);
        }
      }
    }
    tags
  }

  pub fn resolve(&self, tag: &Tag) -> HashSet<CacheKey> {
    self.tag_to_keys.get(tag).cloned().unwrap_or_default()
  }

  pub fn tags_for(&self, key: &CacheKey) -> HashSet<Tag> {
    self.key_to_tags.get(key).cloned().unwrap_or_default()
  }

  pub fn clear(&mut self) {
    self.tag_to_keys.clear();
    self.key_to_tags.clear();
  }

  pub fn tag_count(&self) -> usize {
    self.tag_to_keys.len()
  }

  pub fn key_count(&self) -> usize {
    self.key_to_tags.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::ResourceName;
  use crate::cache::TagKind;
  use serde_json::json;

  fn page(n: u64) -> CacheKey {
    CacheKey::new(
      ResourceName::Animals,
      "getAnimals",
      &json!({"pageSize": 10, "currentPage": n}),
    )
  }

  #[test]
  fn register_and_resolve() {
    let mut index = TagIndex::new();
    let tag = Tag::list(TagKind::Animals);
    index.register(tag.clone(), page(1));

    assert!(index.resolve(&tag).contains(&page(1)));
    assert!(index.tags_for(&page(1)).contains(&tag));
  }

  #[test]
  fn one_tag_covers_many_keys() {
    let mut index = TagIndex::new();
    let tag = Tag::list(TagKind::Animals);
    index.register(tag.clone(), page(1));
    index.register(tag.clone(), page(2));

    let keys = index.resolve(&tag);
    assert_eq!(keys.len(), 2);
    assert!(keys.contains(&page(1)));
    assert!(keys.contains(&page(2)));
  }

  #[test]
  fn remove_key_cleans_every_bucket() {
    let mut index = TagIndex::new();
    let detail = CacheKey::new(ResourceName::Orders, "getOrderById", &json!({"id": 7}));
    index.register_all(
      &detail,
      [Tag::list(TagKind::Orders), Tag::item(TagKind::Orders, "7")],
    );
    assert_eq!(index.tag_count(), 2);

    let removed = index.remove_key(&detail);
    assert_eq!(removed.len(), 2);
    assert_eq!(index.tag_count(), 0);
    assert_eq!(index.key_count(), 0);
  }

  #[test]
  fn unregister_single_pair_keeps_the_rest() {
    let mut index = TagIndex::new();
    let list = Tag::list(TagKind::Orders);
    let item = Tag::item(TagKind::Orders, "7");
    let detail = CacheKey::new(ResourceName::Orders, "getOrderById", &json!({"id": 7}));
    index.register(list.clone(), detail.clone());
    index.register(item.clone(), detail.clone());

    index.unregister(&list, &detail);
    assert!(index.resolve(&list).is_empty());
    assert!(index.resolve(&item).contains(&detail));
    assert_eq!(index.key_count(), 1);
  }

  #[test]
  fn register_all_replaces_previous_tags() {
    let mut index = TagIndex::new();
    let key = page(1);
    index.register_all(&key, [Tag::list(TagKind::Animals), Tag::item(TagKind::Animals, "1")]);
    index.register_all(&key, [Tag::list(TagKind::Animals)]);

    assert_eq!(index.tags_for(&key).len(), 1);
    assert!(index.resolve(&Tag::item(TagKind::Animals, "1")).is_empty());
  }
}
