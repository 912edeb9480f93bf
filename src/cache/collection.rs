//! Entity collections on top of the resource cache.
//!
//! A collection caches `Vec<E>` per key and turns create / update / delete
//! into optimistic writes: the list changes at once and is reconciled with
//! what the transport returns.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use tracing::debug;

use super::config::CacheConfig;
use super::key::ResourceKey;
use super::layer::{ResourceCache, Subscription};
use super::traits::{CacheEntry, Draft, Entity, Patch};
use super::transport::Transport;
use crate::error::ResourceResult;
use crate::query::Query;

/// Cached lists of `E`, keyed by collection path, written through `Tr`.
pub struct Collection<E: Entity, Tr: Transport> {
  cache: ResourceCache<Vec<E>>,
  transport: Arc<Tr>,
  provisional: Arc<AtomicU64>,
}

impl<E: Entity, Tr: Transport> Clone for Collection<E, Tr> {
  fn clone(&self) -> Self {
    Self {
      cache: self.cache.clone(),
      transport: Arc::clone(&self.transport),
      provisional: Arc::clone(&self.provisional),
    }
  }
}

impl<E: Entity, Tr: Transport> Collection<E, Tr> {
  pub fn new(transport: Arc<Tr>, config: CacheConfig) -> Self {
    Self {
      cache: ResourceCache::from_transport(Arc::clone(&transport), config),
      transport,
      provisional: Arc::new(AtomicU64::new(0)),
    }
  }

  /// The underlying cache, for lower-level access.
  pub fn cache(&self) -> &ResourceCache<Vec<E>> {
    &self.cache
  }

  pub fn subscribe<F>(&self, key: impl Into<ResourceKey>, callback: F) -> Subscription<Vec<E>>
  where
    F: Fn(&CacheEntry<Vec<E>>) + Send + Sync + 'static,
  {
    self.cache.subscribe(key, callback)
  }

  pub fn query(&self, key: impl Into<ResourceKey>) -> Query<Vec<E>> {
    Query::new(&self.cache, key)
  }

  pub fn read(&self, key: impl Into<ResourceKey>) -> CacheEntry<Vec<E>> {
    self.cache.read(key)
  }

  pub fn revalidate(
    &self,
    key: impl Into<ResourceKey>,
  ) -> impl Future<Output = ResourceResult<()>> + Send + 'static {
    self.cache.revalidate(key)
  }

  pub fn invalidate(&self, key: impl Into<ResourceKey>) {
    self.cache.invalidate(key)
  }

  /// Create an entity in the collection at `key`.
  ///
  /// A placeholder built by [`Draft::draft`] is appended immediately under a
  /// provisional id; once the server answers, the stored entity takes its
  /// place. Invalid drafts are rejected before the cache is touched.
  pub fn create<D>(&self, key: impl Into<ResourceKey>, draft: D) -> BoxFuture<'static, ResourceResult<E>>
  where
    D: Draft<E>,
  {
    if let Err(e) = draft.validate() {
      return future::ready(Err(e)).boxed();
    }

    let key = key.into();
    let provisional_id = format!("pending-{}", self.provisional.fetch_add(1, Ordering::Relaxed) + 1);
    let placeholder = draft.draft(&provisional_id);
    debug!(%key, entity = E::entity_type(), %provisional_id, "creating");

    let transport = Arc::clone(&self.transport);
    let commit_key = key.clone();
    let commit = async move { transport.create_resource::<D, E>(&commit_key, &draft).await };

    self
      .cache
      .mutate_with(
        key,
        move |list: Option<&Vec<E>>| {
          let mut list = list.cloned().unwrap_or_default();
          list.push(placeholder.clone());
          list
        },
        commit,
        |base: Option<&Vec<E>>, created: &E| upsert(base, created),
      )
      .boxed()
  }

  /// Update entity `id` in the collection at `key` by applying `patch`.
  pub fn update<P>(
    &self,
    key: impl Into<ResourceKey>,
    id: &str,
    patch: P,
  ) -> BoxFuture<'static, ResourceResult<E>>
  where
    P: Patch<E>,
  {
    if let Err(e) = patch.validate() {
      return future::ready(Err(e)).boxed();
    }

    let key = key.into();
    let id = id.to_string();
    let patch = Arc::new(patch);
    debug!(%key, entity = E::entity_type(), %id, "updating");

    let transport = Arc::clone(&self.transport);
    let commit_key = key.clone();
    let commit_id = id.clone();
    let commit_patch = Arc::clone(&patch);
    let commit = async move {
      transport
        .update_resource::<P, E>(&commit_key, &commit_id, commit_patch.as_ref())
        .await
    };

    self
      .cache
      .mutate_with(
        key,
        move |list: Option<&Vec<E>>| {
          list
            .map(|items| {
              items
                .iter()
                .map(|item| if item.id() == id { patch.apply(item) } else { item.clone() })
                .collect()
            })
            .unwrap_or_default()
        },
        commit,
        |base: Option<&Vec<E>>, updated: &E| upsert(base, updated),
      )
      .boxed()
  }

  /// Delete entity `id` from the collection at `key`.
  pub fn remove(&self, key: impl Into<ResourceKey>, id: &str) -> BoxFuture<'static, ResourceResult<()>> {
    let key = key.into();
    let id = id.to_string();
    debug!(%key, entity = E::entity_type(), %id, "deleting");

    let transport = Arc::clone(&self.transport);
    let commit_key = key.clone();
    let commit_id = id.clone();
    let commit = async move { transport.delete_resource(&commit_key, &commit_id).await };

    let filter_id = id.clone();
    self
      .cache
      .mutate_with(
        key,
        move |list: Option<&Vec<E>>| without(list, &filter_id),
        commit,
        move |base: Option<&Vec<E>>, _: &()| without(base, &id),
      )
      .boxed()
  }
}

/// Replace the member with the same id, or append.
fn upsert<E: Entity>(list: Option<&Vec<E>>, entity: &E) -> Vec<E> {
  let mut list = list.cloned().unwrap_or_default();
  match list.iter_mut().find(|item| item.id() == entity.id()) {
    Some(slot) => *slot = entity.clone(),
    None => list.push(entity.clone()),
  }
  list
}

fn without<E: Entity>(list: Option<&Vec<E>>, id: &str) -> Vec<E> {
  list
    .map(|items| items.iter().filter(|item| item.id() != id).cloned().collect())
    .unwrap_or_default()
}
