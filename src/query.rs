//! Pollable view of one cache key for render loops.
//!
//! A `Query<T>` subscribes to a [`ResourceCache`] key and funnels every
//! notification into a channel, so an event loop can pick up changes on its
//! own tick instead of reacting inside a callback.
//!
//! # Example
//!
//! ```ignore
//! let mut query = library.novels().query(ApiKey::Novels);
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // In render
//! match query.status() {
//!     EntryStatus::Loading => render_spinner(),
//!     EntryStatus::Ready => render_data(query.data()),
//!     EntryStatus::Error => render_error(query.error()),
//!     EntryStatus::Idle => {}
//! }
//! ```

use tokio::sync::mpsc;

use crate::cache::{CacheEntry, EntryStatus, ResourceCache, ResourceKey, Subscription};
use crate::error::ResourceError;

/// Subscription to one key whose latest entry is read by polling.
///
/// Dropping the query unsubscribes. It is not `Clone`; each query owns its
/// own subscription.
pub struct Query<T: Clone + Send + Sync + 'static> {
  cache: ResourceCache<T>,
  entry: CacheEntry<T>,
  receiver: mpsc::UnboundedReceiver<CacheEntry<T>>,
  _subscription: Subscription<T>,
}

impl<T: Clone + Send + Sync + 'static> Query<T> {
  /// Subscribe to `key`. Fetching starts according to the cache's usual
  /// subscribe rules.
  pub fn new(cache: &ResourceCache<T>, key: impl Into<ResourceKey>) -> Self {
    let key = key.into();
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = cache.subscribe(key.clone(), move |entry: &CacheEntry<T>| {
      // Ignore send errors - the query may be mid-drop
      let _ = tx.send(entry.clone());
    });

    let mut query = Self {
      cache: cache.clone(),
      entry: CacheEntry::idle(key),
      receiver: rx,
      _subscription: subscription,
    };
    query.poll();
    query
  }

  /// Drain pending notifications.
  ///
  /// Returns `true` if the entry changed since the last poll. Call this in
  /// your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;
    while let Ok(entry) = self.receiver.try_recv() {
      self.entry = entry;
      changed = true;
    }
    changed
  }

  /// Wait for the next notification, then drain any that queued behind it.
  ///
  /// Returns `false` if the cache side of the channel has gone away.
  pub async fn changed(&mut self) -> bool {
    match self.receiver.recv().await {
      Some(entry) => {
        self.entry = entry;
        self.poll();
        true
      }
      None => false,
    }
  }

  /// Force a refetch of this key. The fetch runs on its own task; watch for
  /// the result with [`poll`](Self::poll) or [`changed`](Self::changed).
  pub fn refetch(&self) {
    drop(self.cache.revalidate(self.entry.key.clone()));
  }

  pub fn key(&self) -> &ResourceKey {
    &self.entry.key
  }

  /// Latest entry seen by this query.
  pub fn entry(&self) -> &CacheEntry<T> {
    &self.entry
  }

  pub fn data(&self) -> Option<&T> {
    self.entry.data()
  }

  pub fn status(&self) -> EntryStatus {
    self.entry.status
  }

  pub fn is_loading(&self) -> bool {
    self.entry.is_loading()
  }

  pub fn is_ready(&self) -> bool {
    self.entry.is_ready()
  }

  pub fn is_error(&self) -> bool {
    self.entry.is_error()
  }

  pub fn error(&self) -> Option<&ResourceError> {
    self.entry.error.as_ref()
  }
}

impl<T: Clone + Send + Sync + std::fmt::Debug + 'static> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("entry", &self.entry)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;
  use std::time::Duration;

  #[tokio::test]
  async fn test_query_success() {
    let cache = ResourceCache::new(|_key: ResourceKey| async { Ok(vec![1, 2, 3]) });
    let mut query = Query::new(&cache, "numbers");

    assert!(query.is_loading());

    // Wait for the result
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(query.poll());
    assert!(query.is_ready());
    assert_eq!(query.data(), Some(&vec![1, 2, 3]));
    assert!(!query.poll());
  }

  #[tokio::test]
  async fn test_query_error() {
    let cache: ResourceCache<i32> =
      ResourceCache::new(|_key: ResourceKey| async { Err(ResourceError::Network("Something went wrong".to_string())) });
    let mut query = Query::new(&cache, "numbers");

    assert!(query.changed().await);
    assert!(query.is_error());
    assert_eq!(
      query.error(),
      Some(&ResourceError::Network("Something went wrong".to_string()))
    );
  }

  #[tokio::test]
  async fn test_changed_waits_for_next_notification() {
    let cache = ResourceCache::new(|_key: ResourceKey| async {
      tokio::time::sleep(Duration::from_millis(20)).await;
      Ok(42)
    });
    let mut query = Query::new(&cache, "answer");
    assert_eq!(query.status(), EntryStatus::Loading);

    assert!(query.changed().await);
    assert_eq!(query.data(), Some(&42));
    assert_eq!(query.key().as_str(), "answer");
  }

  #[tokio::test]
  async fn test_two_queries_share_one_fetch() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();
    let cache = ResourceCache::new(move |_key: ResourceKey| {
      let n = counter_clone.fetch_add(1, Ordering::SeqCst);
      async move { Ok(n) }
    });

    let mut first = Query::new(&cache, "count");
    let mut second = Query::new(&cache, "count");
    tokio::time::sleep(Duration::from_millis(10)).await;
    first.poll();
    second.poll();

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(first.data(), second.data());
  }

  #[tokio::test]
  async fn test_refetch_bumps_version() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();
    let cache = ResourceCache::new(move |_key: ResourceKey| {
      let n = counter_clone.fetch_add(1, Ordering::SeqCst);
      async move { Ok(n) }
    });

    let mut query = Query::new(&cache, "count");
    tokio::time::sleep(Duration::from_millis(10)).await;
    query.poll();
    assert_eq!(query.data(), Some(&0));

    query.refetch();
    tokio::time::sleep(Duration::from_millis(10)).await;
    query.poll();
    assert_eq!(query.data(), Some(&1));
    assert_eq!(query.entry().version, 2);
  }

  #[tokio::test]
  async fn test_drop_unsubscribes() {
    let cache = ResourceCache::with_config(
      |_key: ResourceKey| async { Ok(1) },
      crate::cache::CacheConfig::new(Duration::from_secs(60), Duration::ZERO),
    );
    let query = Query::new(&cache, "count");
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(cache.gc(), 0);

    drop(query);
    assert_eq!(cache.gc(), 1);
  }
}
