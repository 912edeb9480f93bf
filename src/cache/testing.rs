//! Test doubles shared by the cache tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use super::config::CacheConfig;
use super::key::ResourceKey;
use super::layer::ResourceCache;
use super::traits::{CacheEntry, EntryStatus};
use crate::error::{ResourceError, ResourceResult};

type Responder<T> = oneshot::Sender<ResourceResult<T>>;

/// A fetcher whose requests stay open until the test answers them.
pub struct ScriptedFetcher<T> {
  open: Arc<Mutex<VecDeque<Responder<T>>>>,
  calls: Arc<AtomicUsize>,
}

impl<T: Clone + Send + Sync + 'static> ScriptedFetcher<T> {
  pub fn new() -> Self {
    Self {
      open: Arc::new(Mutex::new(VecDeque::new())),
      calls: Arc::new(AtomicUsize::new(0)),
    }
  }

  pub fn cache(&self, config: CacheConfig) -> ResourceCache<T> {
    let open = Arc::clone(&self.open);
    let calls = Arc::clone(&self.calls);
    ResourceCache::with_config(
      move |_key: ResourceKey| {
        let (tx, rx) = oneshot::channel();
        open.lock().unwrap().push_back(tx);
        calls.fetch_add(1, Ordering::SeqCst);
        async move {
          rx.await
            .unwrap_or_else(|_| Err(ResourceError::Network("request dropped".to_string())))
        }
      },
      config,
    )
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  /// Answer the oldest open request.
  pub fn respond(&self, result: ResourceResult<T>) {
    let tx = self.open.lock().unwrap().pop_front().expect("no open request");
    let _ = tx.send(result);
  }

  /// Answer the newest open request.
  pub fn respond_latest(&self, result: ResourceResult<T>) {
    let tx = self.open.lock().unwrap().pop_back().expect("no open request");
    let _ = tx.send(result);
  }
}

/// Collects every entry delivered to a subscriber.
pub struct Recorder<T> {
  seen: Arc<Mutex<Vec<CacheEntry<T>>>>,
}

impl<T: Clone + Send + Sync + 'static> Recorder<T> {
  pub fn new() -> Self {
    Self {
      seen: Arc::new(Mutex::new(Vec::new())),
    }
  }

  pub fn callback(&self) -> impl Fn(&CacheEntry<T>) + Send + Sync + 'static {
    let seen = Arc::clone(&self.seen);
    move |entry: &CacheEntry<T>| seen.lock().unwrap().push(entry.clone())
  }

  pub fn entries(&self) -> Vec<CacheEntry<T>> {
    self.seen.lock().unwrap().clone()
  }

  pub fn statuses(&self) -> Vec<EntryStatus> {
    self.seen.lock().unwrap().iter().map(|e| e.status).collect()
  }

  pub fn last(&self) -> Option<CacheEntry<T>> {
    self.seen.lock().unwrap().last().cloned()
  }
}

/// A commit future that resolves with whatever is sent on the returned sender.
pub fn gated<R: Send + 'static>() -> (
  oneshot::Sender<ResourceResult<R>>,
  impl std::future::Future<Output = ResourceResult<R>> + Send + 'static,
) {
  let (tx, rx) = oneshot::channel();
  let commit = async move {
    rx.await
      .unwrap_or_else(|_| Err(ResourceError::Network("commit dropped".to_string())))
  };
  (tx, commit)
}

/// Give spawned fetch and commit tasks a chance to finish.
pub async fn settle() {
  tokio::time::sleep(Duration::from_millis(10)).await;
}
