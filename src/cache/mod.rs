//! Client-side resource cache with optimistic mutation.
//!
//! This module provides a transport-agnostic cache that:
//! - Deduplicates concurrent fetches of the same key
//! - Serves stale data while revalidating in the background
//! - Applies writes optimistically and rolls them back in LIFO order on failure
//! - Evicts entries nobody has used for `cache_time`

mod collection;
mod config;
mod key;
mod layer;
mod mutation;
mod notify;
mod storage;
mod traits;
mod transport;

#[cfg(test)]
mod testing;

pub use collection::Collection;
pub use config::CacheConfig;
pub use key::ResourceKey;
pub use layer::{GcHandle, ResourceCache, Subscription};
pub use traits::{CacheEntry, Draft, Entity, EntryStatus, Patch};
pub use transport::Transport;
