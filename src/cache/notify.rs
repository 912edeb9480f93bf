//! Subscriber registry types and the ordered notification queue.

use std::collections::VecDeque;
use std::sync::Arc;

use super::key::ResourceKey;
use super::storage::Slot;
use super::traits::CacheEntry;

pub(super) type Callback<T> = Arc<dyn Fn(&CacheEntry<T>) + Send + Sync>;

pub(super) struct Subscriber<T> {
  pub id: u64,
  pub callback: Callback<T>,
}

/// One queued delivery of a snapshot to one subscriber.
pub(super) struct Notification<T> {
  pub key: ResourceKey,
  pub subscriber: u64,
  pub callback: Callback<T>,
  pub entry: Arc<CacheEntry<T>>,
}

/// FIFO of pending deliveries.
///
/// Transitions enqueue under the table lock, so queue order is transition
/// order. Only one dispatcher drains at a time (`dispatching`), which keeps
/// re-entrant transitions raised from inside a callback behind the ones
/// already queued.
pub(super) struct Outbox<T> {
  queue: VecDeque<Notification<T>>,
  pub dispatching: bool,
}

impl<T: Clone> Outbox<T> {
  pub fn new() -> Self {
    Self {
      queue: VecDeque::new(),
      dispatching: false,
    }
  }

  /// Queue the slot's current state for every subscriber of that slot.
  pub fn enqueue_all(&mut self, slot: &Slot<T>) {
    if slot.subscribers.is_empty() {
      return;
    }
    let entry = Arc::new(slot.snapshot());
    for subscriber in &slot.subscribers {
      self.queue.push_back(Notification {
        key: slot.key.clone(),
        subscriber: subscriber.id,
        callback: Arc::clone(&subscriber.callback),
        entry: Arc::clone(&entry),
      });
    }
  }

  /// Queue the slot's current state for a single subscriber.
  pub fn enqueue_one(&mut self, slot: &Slot<T>, subscriber: u64, callback: &Callback<T>) {
    self.queue.push_back(Notification {
      key: slot.key.clone(),
      subscriber,
      callback: Arc::clone(callback),
      entry: Arc::new(slot.snapshot()),
    });
  }

  pub fn pop(&mut self) -> Option<Notification<T>> {
    self.queue.pop_front()
  }

  #[cfg(test)]
  pub fn len(&self) -> usize {
    self.queue.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;

  fn subscriber(id: u64, seen: &Arc<Mutex<Vec<u64>>>) -> Subscriber<u32> {
    let seen = Arc::clone(seen);
    Subscriber {
      id,
      callback: Arc::new(move |entry: &CacheEntry<u32>| {
        seen.lock().unwrap().push(entry.version);
      }),
    }
  }

  #[test]
  fn test_enqueue_all_shares_one_snapshot() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut slot = Slot::new(ResourceKey::from("novels"));
    slot.subscribers.push(subscriber(1, &seen));
    slot.subscribers.push(subscriber(2, &seen));
    slot.version = 4;

    let mut outbox = Outbox::new();
    outbox.enqueue_all(&slot);
    assert_eq!(outbox.len(), 2);

    let first = outbox.pop().unwrap();
    let second = outbox.pop().unwrap();
    assert!(Arc::ptr_eq(&first.entry, &second.entry));
    assert_eq!(first.subscriber, 1);
    assert_eq!(second.subscriber, 2);

    (first.callback)(&first.entry);
    (second.callback)(&second.entry);
    assert_eq!(*seen.lock().unwrap(), vec![4, 4]);
  }

  #[test]
  fn test_enqueue_all_without_subscribers_is_noop() {
    let slot: Slot<u32> = Slot::new(ResourceKey::from("novels"));
    let mut outbox = Outbox::new();
    outbox.enqueue_all(&slot);
    assert!(outbox.pop().is_none());
  }
}
