//! Resource cache that coordinates subscribers, fetches and invalidation.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::config::CacheConfig;
use super::key::ResourceKey;
use super::notify::{Callback, Outbox, Subscriber};
use super::storage::{EntryTable, FetchDone, InFlight};
use super::traits::{CacheEntry, EntryStatus};
use super::transport::Transport;
use crate::error::{ResourceError, ResourceResult};

/// A factory function that creates futures for fetching a key
type FetcherFn<T> = Arc<dyn Fn(ResourceKey) -> BoxFuture<'static, ResourceResult<T>> + Send + Sync>;

pub(super) struct State<T> {
  pub table: EntryTable<T>,
  pub outbox: Outbox<T>,
  next_subscriber: u64,
  next_mutation: u64,
  next_request: u64,
}

impl<T: Clone> State<T> {
  fn new() -> Self {
    Self {
      table: EntryTable::new(),
      outbox: Outbox::new(),
      next_subscriber: 0,
      next_mutation: 0,
      next_request: 0,
    }
  }

  fn next_subscriber(&mut self) -> u64 {
    self.next_subscriber += 1;
    self.next_subscriber
  }

  pub fn next_mutation(&mut self) -> u64 {
    self.next_mutation += 1;
    self.next_mutation
  }

  /// Sequence number shared by fetches and commits, used to detect stale
  /// responses.
  pub fn next_request(&mut self) -> u64 {
    self.next_request += 1;
    self.next_request
  }
}

pub(super) struct Inner<T> {
  state: Mutex<State<T>>,
  fetcher: FetcherFn<T>,
  config: CacheConfig,
}

/// A fetch registered in the table whose request has not been built yet.
#[must_use]
struct Launch<T> {
  key: ResourceKey,
  seq: u64,
  tx: oneshot::Sender<BoxFuture<'static, ResourceResult<T>>>,
}

/// Key-indexed cache of resources with deduplicated fetches and optimistic
/// mutation.
///
/// The cache is cheap to clone; clones share the same table. All operations
/// must run inside a Tokio runtime because fetches and commits are spawned as
/// tasks. The table lock is never held across an await or while a subscriber
/// callback or the fetcher runs, but optimistic updaters and reconcilers do
/// run under it and must not call back into the cache.
pub struct ResourceCache<T> {
  pub(super) inner: Arc<Inner<T>>,
}

impl<T> Clone for ResourceCache<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<T> std::fmt::Debug for ResourceCache<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ResourceCache")
      .field("config", &self.inner.config)
      .finish_non_exhaustive()
  }
}

impl<T> ResourceCache<T>
where
  T: Clone + Send + Sync + 'static,
{
  /// Create a cache with default configuration around a fetch function.
  pub fn new<F, Fut>(fetcher: F) -> Self
  where
    F: Fn(ResourceKey) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ResourceResult<T>> + Send + 'static,
  {
    Self::with_config(fetcher, CacheConfig::default())
  }

  pub fn with_config<F, Fut>(fetcher: F, config: CacheConfig) -> Self
  where
    F: Fn(ResourceKey) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ResourceResult<T>> + Send + 'static,
  {
    Self {
      inner: Arc::new(Inner {
        state: Mutex::new(State::new()),
        fetcher: Arc::new(move |key| fetcher(key).boxed()),
        config,
      }),
    }
  }

  /// Create a cache that fetches through a transport.
  pub fn from_transport<Tr: Transport>(transport: Arc<Tr>, config: CacheConfig) -> Self
  where
    T: DeserializeOwned,
  {
    Self::with_config(
      move |key: ResourceKey| {
        let transport = Arc::clone(&transport);
        async move { transport.fetch_resource::<T>(&key).await }
      },
      config,
    )
  }

  pub fn config(&self) -> &CacheConfig {
    &self.inner.config
  }

  /// Register `callback` for every change to `key`.
  ///
  /// The callback first receives the current entry. A missing or idle entry
  /// starts loading; a ready entry older than `stale_time` keeps serving its
  /// data while it revalidates in the background.
  pub fn subscribe<F>(&self, key: impl Into<ResourceKey>, callback: F) -> Subscription<T>
  where
    F: Fn(&CacheEntry<T>) + Send + Sync + 'static,
  {
    let key = key.into();
    let callback: Callback<T> = Arc::new(callback);

    let (id, launch) = {
      let mut guard = self.inner.lock();
      let st = &mut *guard;
      let id = st.next_subscriber();

      let slot = st.table.get_or_insert(&key);
      slot.subscribers.push(Subscriber {
        id,
        callback: Arc::clone(&callback),
      });
      slot.idle_since = None;
      st.outbox.enqueue_one(slot, id, &callback);

      let needs_fetch = slot.needs_fetch(self.inner.config.stale_time);
      debug!(%key, subscriber = id, subscribers = slot.subscribers.len(), "subscribed");

      let launch = needs_fetch.then(|| self.inner.start_fetch(st, &key).1);
      (id, launch)
    };
    if let Some(launch) = launch {
      self.inner.launch(launch);
    }
    self.inner.dispatch();

    Subscription {
      inner: Arc::downgrade(&self.inner),
      key,
      id,
    }
  }

  /// Synchronous snapshot of `key`. Never fetches.
  pub fn read(&self, key: impl Into<ResourceKey>) -> CacheEntry<T> {
    let key = key.into();
    let st = self.inner.lock();
    match st.table.get(key.as_str()) {
      Some(slot) => slot.snapshot(),
      None => CacheEntry::idle(key),
    }
  }

  /// Fetch `key` again, or attach to the fetch already in flight for it.
  ///
  /// Resolves once the result has been applied to the entry. Dropping the
  /// returned future does not cancel the request.
  pub fn revalidate(
    &self,
    key: impl Into<ResourceKey>,
  ) -> impl Future<Output = ResourceResult<()>> + Send + 'static {
    let key = key.into();
    let (done, launch) = {
      let mut guard = self.inner.lock();
      let st = &mut *guard;
      let attached = st
        .table
        .get(key.as_str())
        .and_then(|slot| slot.in_flight.as_ref())
        .map(|flight| (flight.seq, flight.done.clone()));

      match attached {
        Some((seq, done)) => {
          debug!(%key, seq, "attaching to in-flight fetch");
          (done, None)
        }
        None => {
          let (done, launch) = self.inner.start_fetch(st, &key);
          (done, Some(launch))
        }
      }
    };
    if let Some(launch) = launch {
      self.inner.launch(launch);
    }
    self.inner.dispatch();
    done
  }

  /// Mark `key` idle without clearing its data.
  ///
  /// A fetch in flight for the key is superseded and its response will be
  /// discarded; the next `subscribe` or `revalidate` fetches afresh.
  pub fn invalidate(&self, key: impl Into<ResourceKey>) {
    let key = key.into();
    {
      let mut guard = self.inner.lock();
      let st = &mut *guard;
      let Some(slot) = st.table.get_mut(key.as_str()) else {
        return;
      };

      if let Some(flight) = slot.take_in_flight() {
        debug!(%key, seq = flight.seq, "superseding in-flight fetch");
      }
      let before = slot.status;
      slot.settle(EntryStatus::Idle);
      if slot.status != before {
        st.outbox.enqueue_all(slot);
      }
    }
    self.inner.dispatch();
  }

  /// Run one eviction pass, returning how many entries were removed.
  ///
  /// An entry is evicted once it has had no subscriber, no pending mutation
  /// and no in-flight fetch for at least `cache_time`.
  pub fn gc(&self) -> usize {
    self.inner.gc()
  }

  /// Run [`gc`](Self::gc) every `gc_interval` until the handle or the cache
  /// is dropped.
  pub fn spawn_gc(&self) -> GcHandle {
    let weak = Arc::downgrade(&self.inner);
    let period = self.inner.config.gc_interval.max(Duration::from_millis(1));

    let task = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(period);
      // The first tick completes immediately
      ticker.tick().await;
      loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else {
          break;
        };
        inner.gc();
      }
    });

    GcHandle { task }
  }

  /// Keys currently held, in sorted order.
  pub fn keys(&self) -> Vec<ResourceKey> {
    self.inner.lock().table.keys()
  }

  pub fn len(&self) -> usize {
    self.inner.lock().table.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl<T> Inner<T>
where
  T: Clone + Send + Sync + 'static,
{
  pub(super) fn lock(&self) -> MutexGuard<'_, State<T>> {
    // Callbacks never run under the lock, so a poisoned table is still
    // consistent.
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Register a fetch for `key` as the key's current in-flight fetch.
  ///
  /// The request itself is built by [`launch`](Self::launch) once the table
  /// lock has been released, so fetchers are free to read the cache.
  fn start_fetch(self: &Arc<Self>, st: &mut State<T>, key: &ResourceKey) -> (FetchDone, Launch<T>) {
    let seq = st.next_request();
    let inner = Arc::clone(self);
    let task_key = key.clone();
    let (tx, rx) = oneshot::channel::<BoxFuture<'static, ResourceResult<T>>>();

    let task = tokio::spawn(async move {
      let result = match rx.await {
        Ok(request) => AssertUnwindSafe(request)
          .catch_unwind()
          .await
          .unwrap_or_else(|_| Err(ResourceError::Network("fetch panicked".to_string()))),
        // The fetcher panicked before handing over a request
        Err(_) => Err(ResourceError::Network("fetch was never issued".to_string())),
      };
      inner.complete_fetch(&task_key, seq, result)
    });

    let done: FetchDone = task
      .map(|joined| {
        joined.unwrap_or_else(|e| Err(ResourceError::Network(format!("fetch task failed: {}", e))))
      })
      .boxed()
      .shared();

    let slot = st.table.get_or_insert(key);
    slot.in_flight = Some(InFlight {
      seq,
      done: done.clone(),
    });
    slot.idle_since = None;

    if slot.status != EntryStatus::Loading {
      slot.status = EntryStatus::Loading;
      st.outbox.enqueue_all(slot);
    }

    let launch = Launch {
      key: key.clone(),
      seq,
      tx,
    };
    (done, launch)
  }

  /// Build the request for a registered fetch and hand it to its task.
  /// Must be called without the table lock held.
  fn launch(&self, launch: Launch<T>) {
    let request = (self.fetcher)(launch.key.clone());
    debug!(key = %launch.key, seq = launch.seq, "fetch issued");
    // The task only goes away if the runtime is shutting down
    let _ = launch.tx.send(request);
  }

  /// Apply a fetch result if it is still the key's current fetch.
  fn complete_fetch(&self, key: &ResourceKey, seq: u64, result: ResourceResult<T>) -> ResourceResult<()> {
    let outcome = match &result {
      Ok(_) => Ok(()),
      Err(e) => Err(e.clone()),
    };

    {
      let mut guard = self.lock();
      let st = &mut *guard;
      let Some(slot) = st.table.get_mut(key.as_str()) else {
        debug!(%key, seq, "discarding response for evicted entry");
        return outcome;
      };

      if slot.in_flight.as_ref().map(|f| f.seq) != Some(seq) {
        debug!(%key, seq, "discarding superseded fetch response");
        return outcome;
      }
      slot.in_flight = None;

      match result {
        Ok(value) => {
          let refolded = slot.landed.len();
          slot.apply_fetch(value);
          debug!(%key, seq, refolded, version = slot.version, "fetch applied");
        }
        Err(e) => {
          slot.landed.clear();
          warn!(%key, seq, error = %e, "fetch failed");
          slot.error = Some(e);
          slot.settle(EntryStatus::Error);
        }
      }

      if !slot.is_referenced() {
        slot.idle_since = Some(Instant::now());
      }
      st.outbox.enqueue_all(slot);
    }
    self.dispatch();
    outcome
  }

  fn unsubscribe(&self, key: &ResourceKey, id: u64) {
    let mut st = self.lock();
    let Some(slot) = st.table.get_mut(key.as_str()) else {
      return;
    };
    slot.subscribers.retain(|s| s.id != id);
    if !slot.is_referenced() {
      slot.idle_since = Some(Instant::now());
    }
    debug!(%key, subscriber = id, subscribers = slot.subscribers.len(), "unsubscribed");
  }

  fn gc(&self) -> usize {
    let now = Instant::now();
    let cache_time = self.config.cache_time;

    let evicted = self.lock().table.evict_where(|slot| {
      if slot.is_referenced() {
        slot.idle_since = None;
        return false;
      }
      let since = *slot.idle_since.get_or_insert(now);
      now.saturating_duration_since(since) >= cache_time
    });

    for key in &evicted {
      debug!(%key, "evicted cache entry");
    }
    evicted.len()
  }

  /// Deliver queued notifications in order.
  ///
  /// If another caller is already draining the queue this returns at once;
  /// that dispatcher picks up everything enqueued before it finds the queue
  /// empty.
  pub(super) fn dispatch(&self) {
    {
      let mut st = self.lock();
      if st.outbox.dispatching {
        return;
      }
      st.outbox.dispatching = true;
    }
    let _reset = DispatchReset(self);

    loop {
      let next = {
        let mut guard = self.lock();
        let st = &mut *guard;
        loop {
          match st.outbox.pop() {
            None => {
              st.outbox.dispatching = false;
              return;
            }
            Some(n) => {
              let live = st
                .table
                .get(n.key.as_str())
                .is_some_and(|slot| slot.has_subscriber(n.subscriber));
              if live {
                break n;
              }
            }
          }
        }
      };
      (next.callback)(&next.entry);
    }
  }
}

/// Clears the dispatching flag if a subscriber callback panics.
struct DispatchReset<'a, T: Clone + Send + Sync + 'static>(&'a Inner<T>);

impl<T: Clone + Send + Sync + 'static> Drop for DispatchReset<'_, T> {
  fn drop(&mut self) {
    if std::thread::panicking() {
      self.0.lock().outbox.dispatching = false;
    }
  }
}

/// Registration returned by [`ResourceCache::subscribe`].
///
/// Dropping it (or calling [`unsubscribe`](Self::unsubscribe)) removes the
/// callback. In-flight requests are not cancelled.
pub struct Subscription<T: Clone + Send + Sync + 'static> {
  inner: Weak<Inner<T>>,
  key: ResourceKey,
  id: u64,
}

impl<T: Clone + Send + Sync + 'static> Subscription<T> {
  pub fn key(&self) -> &ResourceKey {
    &self.key
  }

  pub fn unsubscribe(self) {
    drop(self);
  }
}

impl<T: Clone + Send + Sync + 'static> Drop for Subscription<T> {
  fn drop(&mut self) {
    if let Some(inner) = self.inner.upgrade() {
      inner.unsubscribe(&self.key, self.id);
    }
  }
}

impl<T: Clone + Send + Sync + 'static> std::fmt::Debug for Subscription<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription")
      .field("key", &self.key)
      .field("id", &self.id)
      .finish()
  }
}

/// Handle for the background gc task. Dropping it stops the task.
#[derive(Debug)]
pub struct GcHandle {
  task: JoinHandle<()>,
}

impl GcHandle {
  pub fn stop(self) {
    drop(self);
  }
}

impl Drop for GcHandle {
  fn drop(&mut self) {
    self.task.abort();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::testing::{settle, Recorder, ScriptedFetcher};
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn instant_cache(calls: Arc<AtomicUsize>) -> ResourceCache<Vec<String>> {
    ResourceCache::with_config(
      move |key: ResourceKey| {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move { Ok(vec![format!("{}#{}", key, n)]) }
      },
      CacheConfig::new(Duration::from_secs(60), Duration::ZERO),
    )
  }

  #[tokio::test]
  async fn test_read_unknown_key_is_idle() {
    let cache = instant_cache(Arc::new(AtomicUsize::new(0)));
    let entry = cache.read("novels");
    assert!(entry.is_idle());
    assert_eq!(entry.data, None);
    assert!(cache.is_empty());
  }

  #[tokio::test]
  async fn test_read_does_not_fetch() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = instant_cache(calls.clone());
    cache.read("novels");
    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_subscribe_fetches_and_notifies() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = instant_cache(calls.clone());
    let recorder = Recorder::new();

    let _sub = cache.subscribe("novels", recorder.callback());
    settle().await;

    let statuses = recorder.statuses();
    // Initial snapshot, then Loading, then Ready
    assert_eq!(
      statuses,
      vec![EntryStatus::Idle, EntryStatus::Loading, EntryStatus::Ready]
    );
    let entry = cache.read("novels");
    assert!(entry.is_ready());
    assert_eq!(entry.data, Some(vec!["novels#1".to_string()]));
    assert_eq!(entry.version, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_two_subscribes_issue_one_fetch() {
    let fetcher = ScriptedFetcher::<Vec<String>>::new();
    let cache = fetcher.cache(CacheConfig::default());

    let _a = cache.subscribe("novels", |_| {});
    let _b = cache.subscribe("novels", |_| {});
    assert_eq!(fetcher.calls(), 1);

    fetcher.respond(Ok(vec!["A".to_string()]));
    settle().await;

    assert_eq!(fetcher.calls(), 1);
    assert_eq!(cache.read("novels").data, Some(vec!["A".to_string()]));
  }

  #[tokio::test]
  async fn test_revalidate_attaches_to_in_flight_fetch() {
    let fetcher = ScriptedFetcher::<u32>::new();
    let cache = fetcher.cache(CacheConfig::default());

    let _sub = cache.subscribe("count", |_| {});
    let first = cache.revalidate("count");
    let second = cache.revalidate("count");
    assert_eq!(fetcher.calls(), 1);

    fetcher.respond(Ok(7));
    assert_eq!(first.await, Ok(()));
    assert_eq!(second.await, Ok(()));
    assert_eq!(cache.read("count").data, Some(7));
    assert_eq!(fetcher.calls(), 1);
  }

  #[tokio::test]
  async fn test_revalidate_after_completion_fetches_again() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = instant_cache(calls.clone());

    cache.revalidate("novels").await.unwrap();
    cache.revalidate("novels").await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let entry = cache.read("novels");
    assert_eq!(entry.version, 2);
    assert_eq!(entry.data, Some(vec!["novels#2".to_string()]));
  }

  #[tokio::test]
  async fn test_failed_fetch_keeps_last_good_data() {
    let fetcher = ScriptedFetcher::<u32>::new();
    let cache = fetcher.cache(CacheConfig::default());

    let first = cache.revalidate("count");
    fetcher.respond(Ok(1));
    first.await.unwrap();

    let second = cache.revalidate("count");
    fetcher.respond(Err(ResourceError::from_status(503, "unavailable")));
    let err = second.await.unwrap_err();
    assert!(err.is_retryable());

    let entry = cache.read("count");
    assert!(entry.is_error());
    assert_eq!(entry.data, Some(1));
    assert_eq!(entry.error, Some(err));
    assert_eq!(entry.version, 1);
  }

  #[tokio::test]
  async fn test_superseded_fetch_never_overwrites() {
    let fetcher = ScriptedFetcher::<&'static str>::new();
    let cache = fetcher.cache(CacheConfig::default());

    let _sub = cache.subscribe("novels", |_| {});
    cache.invalidate("novels");
    let fresh = cache.revalidate("novels");
    assert_eq!(fetcher.calls(), 2);

    // Newer request answers first, then the stale one
    fetcher.respond_latest(Ok("fresh"));
    fresh.await.unwrap();
    fetcher.respond(Ok("stale"));
    settle().await;

    let entry = cache.read("novels");
    assert_eq!(entry.data, Some("fresh"));
    assert_eq!(entry.version, 1);
    assert!(entry.is_ready());
  }

  #[tokio::test]
  async fn test_superseded_fetch_answering_first_is_discarded() {
    let fetcher = ScriptedFetcher::<&'static str>::new();
    let cache = fetcher.cache(CacheConfig::default());

    let _sub = cache.subscribe("novels", |_| {});
    cache.invalidate("novels");
    let fresh = cache.revalidate("novels");

    fetcher.respond(Ok("stale"));
    settle().await;
    assert_eq!(cache.read("novels").data, None);
    assert!(cache.read("novels").is_loading());

    fetcher.respond(Ok("fresh"));
    fresh.await.unwrap();
    assert_eq!(cache.read("novels").data, Some("fresh"));
  }

  #[tokio::test]
  async fn test_invalidate_keeps_data() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = instant_cache(calls.clone());
    let recorder = Recorder::new();

    let _sub = cache.subscribe("novels", recorder.callback());
    settle().await;
    cache.invalidate("novels");

    let entry = cache.read("novels");
    assert!(entry.is_idle());
    assert_eq!(entry.data, Some(vec!["novels#1".to_string()]));
    assert_eq!(recorder.statuses().last(), Some(&EntryStatus::Idle));
    // Invalidation alone does not fetch
    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_subscribe_after_invalidate_fetches() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = instant_cache(calls.clone());

    let _a = cache.subscribe("novels", |_| {});
    settle().await;
    cache.invalidate("novels");
    let _b = cache.subscribe("novels", |_| {});
    settle().await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.read("novels").data, Some(vec!["novels#2".to_string()]));
  }

  #[tokio::test]
  async fn test_invalidate_unknown_key_is_noop() {
    let cache = instant_cache(Arc::new(AtomicUsize::new(0)));
    cache.invalidate("missing");
    assert!(cache.is_empty());
  }

  #[tokio::test]
  async fn test_stale_entry_revalidates_on_subscribe() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let cache = ResourceCache::with_config(
      move |_key: ResourceKey| {
        let n = counter.fetch_add(1, Ordering::SeqCst) as u32 + 1;
        async move { Ok(n) }
      },
      CacheConfig::new(Duration::ZERO, Duration::from_secs(60)),
    );
    let recorder = Recorder::new();

    let _a = cache.subscribe("count", |_| {});
    settle().await;
    let _b = cache.subscribe("count", recorder.callback());
    settle().await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    // The cached value is served while the refresh is in flight
    let seen = recorder.entries();
    assert_eq!(seen[0].data, Some(1));
    assert_eq!(seen[1].status, EntryStatus::Loading);
    assert_eq!(seen[1].data, Some(1));
    assert_eq!(seen[2].data, Some(2));
  }

  #[tokio::test]
  async fn test_unsubscribed_callback_is_not_called() {
    let fetcher = ScriptedFetcher::<u32>::new();
    let cache = fetcher.cache(CacheConfig::default());
    let recorder = Recorder::new();

    let sub = cache.subscribe("count", recorder.callback());
    let before = recorder.entries().len();
    sub.unsubscribe();

    fetcher.respond(Ok(3));
    settle().await;

    // The response still lands in the cache
    assert_eq!(cache.read("count").data, Some(3));
    assert_eq!(recorder.entries().len(), before);
  }

  #[tokio::test]
  async fn test_notifications_are_per_key() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = instant_cache(calls);
    let novels = Recorder::new();
    let worlds = Recorder::new();

    let _a = cache.subscribe("novels", novels.callback());
    let _b = cache.subscribe("worlds", worlds.callback());
    settle().await;
    let seen = novels.entries().len();

    cache.invalidate("worlds");
    assert_eq!(novels.entries().len(), seen);
    assert_eq!(worlds.statuses().last(), Some(&EntryStatus::Idle));
  }

  #[tokio::test]
  async fn test_gc_evicts_released_entries_and_refetches_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = instant_cache(calls.clone());

    let sub = cache.subscribe("novels", |_| {});
    settle().await;
    assert_eq!(cache.gc(), 0);

    sub.unsubscribe();
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.gc(), 1);
    assert!(cache.is_empty());

    let _sub = cache.subscribe("novels", |_| {});
    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.read("novels").version, 1);
  }

  #[tokio::test]
  async fn test_gc_respects_cache_time() {
    let cache = ResourceCache::with_config(
      |_key: ResourceKey| async { Ok(1u32) },
      CacheConfig::new(Duration::from_secs(60), Duration::from_secs(300)),
    );

    drop(cache.subscribe("count", |_| {}));
    settle().await;
    assert_eq!(cache.gc(), 0);
    assert_eq!(cache.keys(), vec![ResourceKey::from("count")]);
  }

  #[tokio::test]
  async fn test_gc_keeps_entry_with_in_flight_fetch() {
    let fetcher = ScriptedFetcher::<u32>::new();
    let cache = fetcher.cache(CacheConfig::new(Duration::from_secs(60), Duration::ZERO));

    drop(cache.subscribe("count", |_| {}));
    assert_eq!(cache.gc(), 0);

    fetcher.respond(Ok(1));
    settle().await;
    assert_eq!(cache.read("count").data, Some(1));
    assert_eq!(cache.gc(), 1);
  }

  #[tokio::test]
  async fn test_spawn_gc_runs_periodically() {
    let cache = ResourceCache::with_config(
      |_key: ResourceKey| async { Ok(1u32) },
      CacheConfig::new(Duration::from_secs(60), Duration::ZERO)
        .with_gc_interval(Duration::from_millis(5)),
    );
    let handle = cache.spawn_gc();

    drop(cache.subscribe("count", |_| {}));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(cache.is_empty());
    handle.stop();
  }

  #[tokio::test]
  async fn test_fetcher_may_read_the_cache() {
    let cell: Arc<std::sync::OnceLock<ResourceCache<Vec<String>>>> = Arc::default();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let fetcher_cell = Arc::clone(&cell);
    let fetcher_seen = Arc::clone(&seen);
    let cache = ResourceCache::new(move |key: ResourceKey| {
      // Runs on the caller's thread; a held table lock would deadlock here
      if let Some(cache) = fetcher_cell.get() {
        let entry = cache.read(key.clone());
        if let Ok(mut seen) = fetcher_seen.lock() {
          seen.push(entry.status);
        }
      }
      async move { Ok(vec![key.to_string()]) }
    });
    assert!(cell.set(cache.clone()).is_ok());

    let _sub = cache.subscribe("novels", |_| {});
    cache.revalidate("chapters").await.unwrap();
    settle().await;

    assert_eq!(
      *seen.lock().unwrap(),
      vec![EntryStatus::Loading, EntryStatus::Loading]
    );
    assert!(cache.read("novels").is_ready());
    assert!(cache.read("chapters").is_ready());
  }

  #[tokio::test]
  async fn test_reentrant_callback_keeps_order() {
    let cache = ResourceCache::with_config(
      |_key: ResourceKey| async { Ok(0u32) },
      CacheConfig::default(),
    );
    let recorder = Recorder::new();
    let _observer = cache.subscribe("count", recorder.callback());
    settle().await;

    // A subscriber that invalidates from inside its callback
    let inner_cache = cache.clone();
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_cb = fired.clone();
    let _trigger = cache.subscribe("count", move |entry: &CacheEntry<u32>| {
      if entry.is_ready() && fired_in_cb.fetch_add(1, Ordering::SeqCst) == 0 {
        inner_cache.invalidate("count");
      }
    });

    let statuses = recorder.statuses();
    assert_eq!(statuses.last(), Some(&EntryStatus::Idle));
    let versions: Vec<u64> = recorder.entries().iter().map(|e| e.version).collect();
    let mut sorted = versions.clone();
    sorted.sort();
    assert_eq!(versions, sorted);
  }
}
