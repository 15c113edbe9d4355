//! In-memory request cache with tag-based invalidation.
//!
//! - [`ResourceCache`]: one per resource family, keyed by endpoint and
//!   normalized parameters, with at most one in-flight fetch per key
//! - [`TagIndex`]: many-to-many tag → entry mapping used for invalidation
//! - [`SubscriptionRegistry`]: mounted consumers per entry, which decides
//!   between background refetch and eviction
//!
//! Nothing here is persisted.

mod entry;
mod index;
mod keys;
mod lock;
mod resource;
mod subscriptions;
mod tags;

pub use entry::{CacheEntry, QuerySnapshot, QueryStatus};
pub use index::TagIndex;
pub use keys::{canonicalize, CacheKey};
pub(crate) use lock::mutex_lock;
pub use resource::{CacheStats, InvalidationReport, MutationOutcome, ResourceCache, Subscription};
pub use subscriptions::SubscriptionRegistry;
pub use tags::{Tag, TagId, TagKind};
