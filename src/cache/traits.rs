//! Core traits and types for the caching system.

use serde::{de::DeserializeOwned, Serialize};

use super::key::ResourceKey;
use crate::error::{ResourceError, ResourceResult};

/// Lifecycle state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryStatus {
  /// Nothing fetched yet, or invalidated
  #[default]
  Idle,
  /// A fetch is in flight (or its result is held behind pending mutations)
  Loading,
  /// Last write succeeded
  Ready,
  /// Last fetch or mutation failed; `data` keeps the last good value
  Error,
}

/// Snapshot of the cached state for one key.
///
/// This is what subscribers receive and what [`read`](super::ResourceCache::read)
/// returns. It is a copy; holding on to it never blocks the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
  pub key: ResourceKey,
  pub data: Option<T>,
  pub status: EntryStatus,
  pub error: Option<ResourceError>,
  /// Incremented on every applied fetch and every committed mutation
  pub version: u64,
  /// Optimistic writes still waiting for their commit
  pub pending_mutations: usize,
}

impl<T> CacheEntry<T> {
  /// An entry for a key the cache knows nothing about.
  pub fn idle(key: ResourceKey) -> Self {
    Self {
      key,
      data: None,
      status: EntryStatus::Idle,
      error: None,
      version: 0,
      pending_mutations: 0,
    }
  }

  pub fn data(&self) -> Option<&T> {
    self.data.as_ref()
  }

  pub fn is_idle(&self) -> bool {
    self.status == EntryStatus::Idle
  }

  pub fn is_loading(&self) -> bool {
    self.status == EntryStatus::Loading
  }

  pub fn is_ready(&self) -> bool {
    self.status == EntryStatus::Ready
  }

  pub fn is_error(&self) -> bool {
    self.status == EntryStatus::Error
  }

  /// Whether optimistic writes are still waiting on the server.
  pub fn is_saving(&self) -> bool {
    self.pending_mutations > 0
  }
}

/// Trait for entities that live in cached collections.
///
/// Implementors must provide a stable identifier used to match optimistic
/// placeholders and server responses.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Unique identifier for this entity within its collection
  fn id(&self) -> &str;

  /// Entity type name for logs (e.g., "novel", "character")
  fn entity_type() -> &'static str;
}

/// A creation payload that can stand in for the entity until the server
/// answers.
pub trait Draft<E: Entity>: Serialize + Send + Sync + 'static {
  /// Reject payloads the server would refuse anyway.
  fn validate(&self) -> ResourceResult<()> {
    Ok(())
  }

  /// Build the optimistic placeholder shown while the create is in flight.
  fn draft(&self, provisional_id: &str) -> E;
}

/// A partial update that can be applied locally ahead of the server.
pub trait Patch<E: Entity>: Serialize + Send + Sync + 'static {
  fn validate(&self) -> ResourceResult<()> {
    Ok(())
  }

  /// Apply the changed fields to a copy of `entity`.
  fn apply(&self, entity: &E) -> E;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_idle_entry() {
    let entry: CacheEntry<Vec<u32>> = CacheEntry::idle(ResourceKey::from("novels"));
    assert!(entry.is_idle());
    assert_eq!(entry.data(), None);
    assert_eq!(entry.version, 0);
    assert!(!entry.is_saving());
  }

  #[test]
  fn test_entry_predicates() {
    let mut entry = CacheEntry::idle(ResourceKey::from("novels"));
    entry.data = Some(1);
    entry.status = EntryStatus::Error;
    entry.pending_mutations = 2;

    assert!(entry.is_error());
    assert!(!entry.is_ready());
    assert!(!entry.is_loading());
    assert!(entry.is_saving());
    assert_eq!(entry.data(), Some(&1));
  }
}
