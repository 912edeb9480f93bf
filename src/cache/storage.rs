//! In-memory entry table: an arena of slots indexed by resource key.
//!
//! Each slot keeps the server-confirmed value (`base`) separately from the
//! visible value (`data`). Pending optimistic updaters form an ordered stack
//! on top of the base, so `data` is always the base with every pending
//! updater replayed in application order.

use std::collections::HashMap;
use std::mem;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, Shared};

use super::key::ResourceKey;
use super::notify::Subscriber;
use super::traits::{CacheEntry, EntryStatus};
use crate::error::{ResourceError, ResourceResult};

/// Optimistic update function, re-run whenever the stack below it changes.
pub(super) type Updater<T> = Box<dyn Fn(Option<&T>) -> T + Send + Sync>;

/// Completion of a fetch, shared by every caller attached to it.
pub(super) type FetchDone = Shared<BoxFuture<'static, ResourceResult<()>>>;

/// An optimistic write waiting for its commit.
pub(super) struct PendingMutation<T> {
  pub id: u64,
  /// Request sequence number assigned when the mutation was issued
  pub seq: u64,
  pub updater: Updater<T>,
  /// View immediately below this mutation
  pub previous_data: Option<T>,
  /// View with this mutation applied
  pub optimistic_data: T,
}

/// The fetch currently allowed to write into a slot.
pub(super) struct InFlight {
  pub seq: u64,
  pub done: FetchDone,
}

pub(super) struct Slot<T> {
  pub key: ResourceKey,
  pub base: Option<T>,
  pub data: Option<T>,
  pub status: EntryStatus,
  pub error: Option<ResourceError>,
  pub version: u64,
  pub pending: Vec<PendingMutation<T>>,
  pub in_flight: Option<InFlight>,
  /// Commits that landed while `in_flight` was open, folded again onto its
  /// result in landing order
  pub landed: Vec<Updater<T>>,
  /// Status to adopt once the pending stack drains while `Loading`
  pub deferred: Option<EntryStatus>,
  pub subscribers: Vec<Subscriber<T>>,
  pub fetched_at: Option<Instant>,
  pub idle_since: Option<Instant>,
}

impl<T: Clone> Slot<T> {
  pub fn new(key: ResourceKey) -> Self {
    Self {
      key,
      base: None,
      data: None,
      status: EntryStatus::Idle,
      error: None,
      version: 0,
      pending: Vec::new(),
      in_flight: None,
      landed: Vec::new(),
      deferred: None,
      subscribers: Vec::new(),
      fetched_at: None,
      idle_since: None,
    }
  }

  pub fn snapshot(&self) -> CacheEntry<T> {
    CacheEntry {
      key: self.key.clone(),
      data: self.data.clone(),
      status: self.status,
      error: self.error.clone(),
      version: self.version,
      pending_mutations: self.pending.len(),
    }
  }

  /// Whether anything still needs this slot to stay in the table.
  pub fn is_referenced(&self) -> bool {
    !self.subscribers.is_empty() || !self.pending.is_empty() || self.in_flight.is_some()
  }

  /// Whether a new subscriber should trigger a fetch.
  pub fn needs_fetch(&self, stale_time: Duration) -> bool {
    if self.in_flight.is_some() {
      return false;
    }
    match self.status {
      EntryStatus::Idle => true,
      EntryStatus::Loading => self.deferred == Some(EntryStatus::Idle),
      EntryStatus::Ready => self
        .fetched_at
        .map(|t| t.elapsed() > stale_time)
        .unwrap_or(true),
      EntryStatus::Error => false,
    }
  }

  /// Push an optimistic update on top of the current view.
  pub fn push_pending(&mut self, id: u64, seq: u64, updater: Updater<T>) {
    let optimistic = updater(self.data.as_ref());
    let previous_data = mem::replace(&mut self.data, Some(optimistic.clone()));
    self.pending.push(PendingMutation {
      id,
      seq,
      updater,
      previous_data,
      optimistic_data: optimistic,
    });
  }

  /// Remove a pending mutation by id, returning it if it was still pending.
  pub fn take_pending(&mut self, id: u64) -> Option<PendingMutation<T>> {
    let pos = self.pending.iter().position(|m| m.id == id)?;
    Some(self.pending.remove(pos))
  }

  /// Recompute the view from the confirmed base.
  ///
  /// Equivalent to unwinding the stack in reverse application order and
  /// replaying the surviving mutations; each mutation's `previous_data` and
  /// `optimistic_data` are refreshed along the way.
  pub fn rebuild(&mut self) {
    let mut view = self.base.clone();
    for mutation in &mut self.pending {
      let optimistic = (mutation.updater)(view.as_ref());
      mutation.previous_data = mem::replace(&mut view, Some(optimistic.clone()));
      mutation.optimistic_data = optimistic;
    }
    self.data = view;
  }

  /// Drop the current fetch along with the commits recorded against it.
  pub fn take_in_flight(&mut self) -> Option<InFlight> {
    self.landed.clear();
    self.in_flight.take()
  }

  /// Remember a commit that landed ahead of the in-flight fetch, so the
  /// fetch result does not lose it.
  pub fn record_landed(&mut self, fold: Updater<T>) {
    if self.in_flight.is_some() {
      self.landed.push(fold);
    }
  }

  /// Adopt a fetched value as the new confirmed base.
  ///
  /// Commits that landed while the fetch was in flight are folded onto it
  /// again; the server may have answered the fetch before applying them.
  pub fn apply_fetch(&mut self, value: T) {
    let mut base = Some(value);
    for fold in self.landed.drain(..) {
      base = Some(fold(base.as_ref()));
    }
    self.base = base;
    self.version += 1;
    self.error = None;
    self.fetched_at = Some(Instant::now());
    self.rebuild();
    self.settle(EntryStatus::Ready);
  }

  /// Record the outcome of a fetch or an invalidation.
  ///
  /// While the entry is loading and mutations are pending the outcome is held
  /// back; the entry leaves `Loading` only once the stack has drained.
  pub fn settle(&mut self, status: EntryStatus) {
    if self.status == EntryStatus::Loading && !self.pending.is_empty() {
      self.deferred = Some(status);
    } else {
      self.status = status;
      self.deferred = None;
    }
  }

  /// Record a failed commit. The caller has already rebuilt the view.
  pub fn fail_mutation(&mut self, error: ResourceError) {
    self.error = Some(error);
    if self.status == EntryStatus::Loading {
      // An in-flight fetch decides the final status, and a held-back
      // invalidation still has to leave the entry idle. Otherwise the failure
      // replaces whatever outcome was being held back.
      if self.in_flight.is_none() && self.deferred != Some(EntryStatus::Idle) {
        self.deferred = Some(EntryStatus::Error);
      }
    } else {
      self.status = EntryStatus::Error;
    }
    self.release_deferred();
  }

  /// Leave `Loading` if nothing is holding the entry there anymore.
  pub fn release_deferred(&mut self) {
    if self.status == EntryStatus::Loading && self.pending.is_empty() && self.in_flight.is_none() {
      self.status = self.deferred.take().unwrap_or(EntryStatus::Ready);
    }
  }

  pub fn has_subscriber(&self, id: u64) -> bool {
    self.subscribers.iter().any(|s| s.id == id)
  }
}

/// Arena of slots with a key index. Freed slots are reused.
pub(super) struct EntryTable<T> {
  slots: Vec<Option<Slot<T>>>,
  free: Vec<usize>,
  index: HashMap<ResourceKey, usize>,
}

impl<T: Clone> EntryTable<T> {
  pub fn new() -> Self {
    Self {
      slots: Vec::new(),
      free: Vec::new(),
      index: HashMap::new(),
    }
  }

  pub fn len(&self) -> usize {
    self.index.len()
  }

  pub fn contains(&self, key: &str) -> bool {
    self.index.contains_key(key)
  }

  pub fn get(&self, key: &str) -> Option<&Slot<T>> {
    let idx = *self.index.get(key)?;
    self.slots.get(idx)?.as_ref()
  }

  pub fn get_mut(&mut self, key: &str) -> Option<&mut Slot<T>> {
    let idx = *self.index.get(key)?;
    self.slots.get_mut(idx)?.as_mut()
  }

  pub fn get_or_insert(&mut self, key: &ResourceKey) -> &mut Slot<T> {
    let idx = match self.index.get(key.as_str()) {
      Some(&idx) => idx,
      None => {
        let idx = self.free.pop().unwrap_or_else(|| {
          self.slots.push(None);
          self.slots.len() - 1
        });
        self.index.insert(key.clone(), idx);
        idx
      }
    };
    self.slots[idx].get_or_insert_with(|| Slot::new(key.clone()))
  }

  pub fn keys(&self) -> Vec<ResourceKey> {
    let mut keys: Vec<ResourceKey> = self.index.keys().cloned().collect();
    keys.sort();
    keys
  }

  /// Remove every slot for which `evict` returns true, returning their keys.
  pub fn evict_where<F>(&mut self, mut evict: F) -> Vec<ResourceKey>
  where
    F: FnMut(&mut Slot<T>) -> bool,
  {
    let mut evicted = Vec::new();
    for (idx, entry) in self.slots.iter_mut().enumerate() {
      let remove = match entry {
        Some(slot) => evict(slot),
        None => false,
      };
      if remove {
        if let Some(slot) = entry.take() {
          self.index.remove(&slot.key);
          self.free.push(idx);
          evicted.push(slot.key);
        }
      }
    }
    evicted
  }
}
