//! The transport contract consumed by the cache and the collection layer.

use std::future::Future;

use serde::{de::DeserializeOwned, Serialize};

use super::key::ResourceKey;
use crate::error::ResourceResult;

/// Asynchronous request function behind the cache.
///
/// Implementations decide what a key means on the wire. Every failure must be
/// classified into a [`ResourceError`](crate::error::ResourceError).
pub trait Transport: Send + Sync + 'static {
  /// Fetch the resource identified by `key`.
  fn fetch_resource<T>(&self, key: &ResourceKey) -> impl Future<Output = ResourceResult<T>> + Send
  where
    T: DeserializeOwned + Send;

  /// Create a member of the collection at `key`, returning the stored entity.
  fn create_resource<P, T>(
    &self,
    key: &ResourceKey,
    payload: &P,
  ) -> impl Future<Output = ResourceResult<T>> + Send
  where
    P: Serialize + Sync,
    T: DeserializeOwned + Send;

  /// Update member `id` of the collection at `key`, returning the stored entity.
  fn update_resource<P, T>(
    &self,
    key: &ResourceKey,
    id: &str,
    payload: &P,
  ) -> impl Future<Output = ResourceResult<T>> + Send
  where
    P: Serialize + Sync,
    T: DeserializeOwned + Send;

  /// Delete member `id` of the collection at `key`.
  fn delete_resource(&self, key: &ResourceKey, id: &str) -> impl Future<Output = ResourceResult<()>> + Send;

  /// Write the single resource at `key` (metadata, settings) and return what
  /// was stored. Fields missing from `payload` are left alone.
  fn put_resource<P, T>(&self, key: &ResourceKey, payload: &P) -> impl Future<Output = ResourceResult<T>> + Send
  where
    P: Serialize + Sync,
    T: DeserializeOwned + Send;

  /// Post `payload` to an action under an existing resource, such as a new
  /// location of a world. Returns the response body if the server sent one.
  fn post_resource<P, T>(
    &self,
    key: &ResourceKey,
    payload: &P,
  ) -> impl Future<Output = ResourceResult<Option<T>>> + Send
  where
    P: Serialize + Sync,
    T: DeserializeOwned + Send;
}
