//! Optimistic writes with ordered rollback.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tracing::{debug, warn};

use super::key::ResourceKey;
use super::layer::{Inner, ResourceCache};
use crate::error::{ResourceError, ResourceResult};

impl<T> ResourceCache<T>
where
  T: Clone + Send + Sync + 'static,
{
  /// Apply `updater` to `key` immediately and commit it in the background.
  ///
  /// Subscribers see the optimistic value before this returns. On success the
  /// value returned by `commit` becomes the confirmed data; on failure the
  /// view is rebuilt without this write, the entry moves to `Error` and the
  /// failure is returned.
  ///
  /// The commit starts right away; awaiting the returned future only waits
  /// for its outcome.
  pub fn mutate<U, C>(
    &self,
    key: impl Into<ResourceKey>,
    updater: U,
    commit: C,
  ) -> impl Future<Output = ResourceResult<T>> + Send + 'static
  where
    U: Fn(Option<&T>) -> T + Send + Sync + 'static,
    C: Future<Output = ResourceResult<T>> + Send + 'static,
  {
    self.mutate_with(key, updater, commit, |_, confirmed: &T| confirmed.clone())
  }

  /// Like [`mutate`](Self::mutate), but the commit returns some other value
  /// (a single created entity, say) that `reconcile` folds into the
  /// confirmed data.
  ///
  /// `updater` may run more than once: whenever a write below it in the
  /// pending stack settles, the remaining writes are replayed on the new
  /// base. `reconcile` runs again if a fetch that was in flight when the
  /// commit landed is applied afterwards. Both closures run under the cache
  /// lock and must not call back into the cache.
  pub fn mutate_with<U, C, R, F>(
    &self,
    key: impl Into<ResourceKey>,
    updater: U,
    commit: C,
    reconcile: F,
  ) -> impl Future<Output = ResourceResult<R>> + Send + 'static
  where
    U: Fn(Option<&T>) -> T + Send + Sync + 'static,
    C: Future<Output = ResourceResult<R>> + Send + 'static,
    R: Clone + Send + Sync + 'static,
    F: Fn(Option<&T>, &R) -> T + Send + Sync + 'static,
  {
    let key = key.into();
    let id = {
      let mut guard = self.inner.lock();
      let st = &mut *guard;
      let id = st.next_mutation();
      let seq = st.next_request();

      let slot = st.table.get_or_insert(&key);
      slot.idle_since = None;
      slot.push_pending(id, seq, Box::new(updater));
      debug!(%key, mutation = id, seq, pending = slot.pending.len(), "optimistic write applied");
      st.outbox.enqueue_all(slot);
      id
    };
    self.inner.dispatch();

    let inner = Arc::clone(&self.inner);
    let task = tokio::spawn(async move {
      let outcome = AssertUnwindSafe(commit)
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(ResourceError::Network("commit panicked".to_string())));
      inner.settle_mutation(&key, id, outcome, reconcile)
    });

    async move {
      task
        .await
        .unwrap_or_else(|e| Err(ResourceError::Network(format!("commit task failed: {}", e))))
    }
  }
}

impl<T> Inner<T>
where
  T: Clone + Send + Sync + 'static,
{
  /// Resolve pending mutation `id` with the commit outcome.
  fn settle_mutation<R, F>(
    &self,
    key: &ResourceKey,
    id: u64,
    outcome: ResourceResult<R>,
    reconcile: F,
  ) -> ResourceResult<R>
  where
    R: Clone + Send + Sync + 'static,
    F: Fn(Option<&T>, &R) -> T + Send + Sync + 'static,
  {
    let result = {
      let mut guard = self.lock();
      let st = &mut *guard;
      let Some(slot) = st.table.get_mut(key.as_str()) else {
        return outcome;
      };
      let Some(mutation) = slot.take_pending(id) else {
        return outcome;
      };

      let result = match outcome {
        Ok(response) => {
          let confirmed = reconcile(slot.base.as_ref(), &response);
          slot.base = Some(confirmed);
          slot.version += 1;
          let landed = response.clone();
          slot.record_landed(Box::new(move |base: Option<&T>| reconcile(base, &landed)));
          slot.rebuild();
          slot.release_deferred();
          debug!(%key, mutation = id, seq = mutation.seq, version = slot.version, "write committed");
          Ok(response)
        }
        Err(e) => {
          warn!(%key, mutation = id, error = %e, "write failed, rolling back");
          slot.rebuild();
          slot.fail_mutation(e.clone());
          Err(e)
        }
      };

      if !slot.is_referenced() {
        slot.idle_since = Some(Instant::now());
      }
      st.outbox.enqueue_all(slot);
      result
    };
    self.dispatch();
    result
  }
}
