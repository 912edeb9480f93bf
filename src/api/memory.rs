//! In-process transport backed by JSON collections.
//!
//! Stands in for the HTTP API in tests and in `quill --memory`. Collections
//! are stored by path; a key that names a member (`{collection}/{id}`)
//! resolves to that member, looking through every collection sharing the
//! segment when `{collection}` itself is not stored, and a key ending in
//! `/search` searches the same way. Single resources written with `PUT` are
//! kept apart as documents.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use url::form_urlencoded;

use crate::cache::{ResourceKey, Transport};
use crate::error::{ResourceError, ResourceResult};

/// Transport call kinds, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
  Fetch,
  Create,
  Update,
  Delete,
  Put,
  Post,
}

#[derive(Default)]
struct Store {
  collections: BTreeMap<String, Vec<Value>>,
  documents: BTreeMap<String, Value>,
  next_id: u64,
  failures: HashMap<Operation, VecDeque<ResourceError>>,
  calls: HashMap<Operation, usize>,
}

#[derive(Default)]
pub struct MemoryTransport {
  store: Mutex<Store>,
  latency: Option<Duration>,
}

impl MemoryTransport {
  pub fn new() -> Self {
    Self::default()
  }

  /// Delay every call by `latency` before it touches the store.
  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = Some(latency);
    self
  }

  /// Replace the collection at `key` with `items`.
  pub fn seed<T: Serialize>(&self, key: impl Into<ResourceKey>, items: &[T]) -> ResourceResult<()> {
    let key = key.into();
    let values = items
      .iter()
      .map(serde_json::to_value)
      .collect::<Result<Vec<_>, _>>()
      .map_err(|e| ResourceError::invalid(format!("unserializable seed: {}", e)))?;

    let mut store = self.lock();
    for value in &values {
      if let Some(n) = value.get("id").and_then(numeric_id) {
        store.next_id = store.next_id.max(n);
      }
    }
    store.collections.insert(key.as_str().to_string(), values);
    Ok(())
  }

  /// Make the next call of kind `op` fail with `error`.
  pub fn fail_next(&self, op: Operation, error: ResourceError) {
    self.lock().failures.entry(op).or_default().push_back(error);
  }

  /// Number of calls of kind `op` made so far.
  pub fn calls(&self, op: Operation) -> usize {
    self.lock().calls.get(&op).copied().unwrap_or(0)
  }

  fn lock(&self) -> MutexGuard<'_, Store> {
    self.store.lock().unwrap_or_else(PoisonError::into_inner)
  }

  async fn pause(&self) {
    if let Some(latency) = self.latency {
      tokio::time::sleep(latency).await;
    }
  }

  /// Count the call and consume an injected failure if one is queued.
  fn begin(&self, op: Operation, key: &ResourceKey) -> ResourceResult<MutexGuard<'_, Store>> {
    let mut store = self.lock();
    *store.calls.entry(op).or_default() += 1;
    debug!(?op, %key, "memory transport call");
    match store.failures.get_mut(&op).and_then(VecDeque::pop_front) {
      Some(error) => Err(error),
      None => Ok(store),
    }
  }
}

impl Store {
  fn fetch(&self, key: &ResourceKey) -> ResourceResult<Value> {
    let (path, query) = split_query(key.as_str());

    if let Some(document) = self.documents.get(path) {
      return Ok(document.clone());
    }

    if let Some(items) = self.collections.get(path) {
      let items = match query_param(query, "q") {
        Some(q) => filter_matching(items.iter(), &q),
        None => items.clone(),
      };
      return Ok(Value::Array(items));
    }

    if let Some(scope) = path.strip_suffix("/search") {
      let segment = last_segment(scope);
      let q = query_param(query, "q").unwrap_or_default();
      let candidates = self
        .collections
        .iter()
        .filter(|(coll, _)| last_segment(coll) == segment)
        .flat_map(|(_, items)| items.iter());
      return Ok(Value::Array(filter_matching(candidates, &q)));
    }

    if let Some(member) = self.member(path) {
      return member.cloned();
    }

    // A collection nobody has written to yet is empty
    Ok(Value::Array(Vec::new()))
  }

  /// The member `path` names, or `None` if `path` does not look like one.
  fn member(&self, path: &str) -> Option<ResourceResult<&Value>> {
    let (parent, id) = path.rsplit_once('/')?;
    let not_found = || ResourceError::NotFound(path.to_string());

    if let Some(items) = self.collections.get(parent) {
      return Some(items.iter().find(|item| id_matches(item, id)).ok_or_else(not_found));
    }

    let segment = last_segment(parent);
    let mut shared = self
      .collections
      .iter()
      .filter(|(coll, _)| last_segment(coll) == segment)
      .peekable();
    shared.peek()?;
    Some(
      shared
        .flat_map(|(_, items)| items.iter())
        .find(|item| id_matches(item, id))
        .ok_or_else(not_found),
    )
  }

  fn member_mut(&mut self, path: &str) -> ResourceResult<&mut Map<String, Value>> {
    let not_found = || ResourceError::NotFound(path.to_string());
    let (parent, id) = path.rsplit_once('/').ok_or_else(not_found)?;
    let segment = last_segment(parent).to_string();
    let direct = self.collections.contains_key(parent);

    self
      .collections
      .iter_mut()
      .filter(|(coll, _)| if direct { coll.as_str() == parent } else { last_segment(coll) == segment })
      .flat_map(|(_, items)| items.iter_mut())
      .find(|item| id_matches(item, id))
      .and_then(Value::as_object_mut)
      .ok_or_else(not_found)
  }

  fn create(&mut self, key: &ResourceKey, payload: Value) -> ResourceResult<Value> {
    let Value::Object(mut fields) = payload else {
      return Err(ResourceError::invalid("payload must be a JSON object"));
    };

    self.next_id += 1;
    let now = Value::String(Utc::now().to_rfc3339());
    fields.insert("id".to_string(), Value::String(self.next_id.to_string()));
    fields.insert("created_at".to_string(), now.clone());
    fields.insert("updated_at".to_string(), now);
    if let Some(novel_id) = parent_novel(key.as_str()) {
      fields
        .entry("novel_id")
        .or_insert_with(|| Value::String(novel_id.to_string()));
    }

    let created = Value::Object(fields);
    self
      .collections
      .entry(key.as_str().to_string())
      .or_default()
      .push(created.clone());
    Ok(created)
  }

  fn update(&mut self, key: &ResourceKey, id: &str, payload: Value) -> ResourceResult<Value> {
    let Value::Object(changes) = payload else {
      return Err(ResourceError::invalid("payload must be a JSON object"));
    };

    let item = self
      .collections
      .get_mut(key.as_str())
      .and_then(|items| items.iter_mut().find(|item| id_matches(item, id)))
      .ok_or_else(|| ResourceError::NotFound(key.child(id).to_string()))?;

    if let Value::Object(fields) = item {
      merge_non_null(fields, changes);
      fields.insert("updated_at".to_string(), Value::String(Utc::now().to_rfc3339()));
    }
    Ok(item.clone())
  }

  fn delete(&mut self, key: &ResourceKey, id: &str) -> ResourceResult<()> {
    let items = self
      .collections
      .get_mut(key.as_str())
      .ok_or_else(|| ResourceError::NotFound(key.child(id).to_string()))?;
    let before = items.len();
    items.retain(|item| !id_matches(item, id));
    if items.len() == before {
      return Err(ResourceError::NotFound(key.child(id).to_string()));
    }

    // Nested collections and documents go with their owner
    let owned = format!("{}/", key.child(id));
    self.collections.retain(|path, _| !path.starts_with(&owned));
    self.documents.retain(|path, _| !path.starts_with(&owned));
    Ok(())
  }

  fn put(&mut self, key: &ResourceKey, payload: Value) -> ResourceResult<Value> {
    let Value::Object(changes) = payload else {
      return Err(ResourceError::invalid("payload must be a JSON object"));
    };

    let document = self
      .documents
      .entry(key.as_str().to_string())
      .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(fields) = document {
      merge_non_null(fields, changes);
    }
    Ok(document.clone())
  }

  /// Record `payload` in the array field named by the last segment of `key`
  /// on the member the rest of `key` names.
  ///
  /// Entries are matched on the payload's id-like fields (`...Id`, `..._id`):
  /// an entry agreeing on all of them is replaced. A payload without any gets
  /// a fresh `id` and is appended.
  fn post(&mut self, key: &ResourceKey, payload: Value) -> ResourceResult<Value> {
    let Value::Object(mut fields) = payload else {
      return Err(ResourceError::invalid("payload must be a JSON object"));
    };
    let (owner, field) = key
      .as_str()
      .rsplit_once('/')
      .ok_or_else(|| ResourceError::NotFound(key.to_string()))?;

    let refs: Vec<(String, Value)> = fields
      .iter()
      .filter(|(name, _)| name.ends_with("Id") || name.ends_with("_id"))
      .map(|(name, value)| (name.clone(), value.clone()))
      .collect();
    if refs.is_empty() {
      self.next_id += 1;
      fields.insert("id".to_string(), Value::String(self.next_id.to_string()));
    }
    let entry = Value::Object(fields);

    let member = self.member_mut(owner)?;
    let entries = member
      .entry(field.to_string())
      .or_insert_with(|| Value::Array(Vec::new()));
    let Value::Array(entries) = entries else {
      return Err(ResourceError::invalid(format!("{} is not a list", field)));
    };
    if !refs.is_empty() {
      entries.retain(|existing| !refs.iter().all(|(name, value)| existing.get(name) == Some(value)));
    }
    entries.push(entry.clone());
    member.insert("updated_at".to_string(), Value::String(Utc::now().to_rfc3339()));
    Ok(entry)
  }
}

impl Transport for MemoryTransport {
  async fn fetch_resource<T>(&self, key: &ResourceKey) -> ResourceResult<T>
  where
    T: DeserializeOwned + Send,
  {
    self.pause().await;
    let value = {
      let store = self.begin(Operation::Fetch, key)?;
      store.fetch(key)?
    };
    decode(key, value)
  }

  async fn create_resource<P, T>(&self, key: &ResourceKey, payload: &P) -> ResourceResult<T>
  where
    P: Serialize + Sync,
    T: DeserializeOwned + Send,
  {
    let payload = encode(payload)?;
    self.pause().await;
    let created = {
      let mut store = self.begin(Operation::Create, key)?;
      store.create(key, payload)?
    };
    decode(key, created)
  }

  async fn update_resource<P, T>(&self, key: &ResourceKey, id: &str, payload: &P) -> ResourceResult<T>
  where
    P: Serialize + Sync,
    T: DeserializeOwned + Send,
  {
    let payload = encode(payload)?;
    self.pause().await;
    let updated = {
      let mut store = self.begin(Operation::Update, key)?;
      store.update(key, id, payload)?
    };
    decode(key, updated)
  }

  async fn delete_resource(&self, key: &ResourceKey, id: &str) -> ResourceResult<()> {
    self.pause().await;
    let mut store = self.begin(Operation::Delete, key)?;
    store.delete(key, id)
  }

  async fn put_resource<P, T>(&self, key: &ResourceKey, payload: &P) -> ResourceResult<T>
  where
    P: Serialize + Sync,
    T: DeserializeOwned + Send,
  {
    let payload = encode(payload)?;
    self.pause().await;
    let stored = {
      let mut store = self.begin(Operation::Put, key)?;
      store.put(key, payload)?
    };
    decode(key, stored)
  }

  async fn post_resource<P, T>(&self, key: &ResourceKey, payload: &P) -> ResourceResult<Option<T>>
  where
    P: Serialize + Sync,
    T: DeserializeOwned + Send,
  {
    let payload = encode(payload)?;
    self.pause().await;
    let stored = {
      let mut store = self.begin(Operation::Post, key)?;
      store.post(key, payload)?
    };
    decode(key, stored).map(Some)
  }
}

fn encode<P: Serialize>(payload: &P) -> ResourceResult<Value> {
  serde_json::to_value(payload).map_err(|e| ResourceError::invalid(format!("unserializable payload: {}", e)))
}

fn decode<T: DeserializeOwned>(key: &ResourceKey, value: Value) -> ResourceResult<T> {
  let empty = value.as_array().is_some_and(Vec::is_empty);
  serde_json::from_value(value).map_err(|e| {
    if empty {
      // An empty collection asked for as a single entity
      ResourceError::NotFound(key.to_string())
    } else {
      ResourceError::Server {
        status: 500,
        message: format!("malformed stored value: {}", e),
      }
    }
  })
}

fn split_query(key: &str) -> (&str, &str) {
  key.split_once('?').unwrap_or((key, ""))
}

fn query_param(query: &str, name: &str) -> Option<String> {
  form_urlencoded::parse(query.as_bytes())
    .find(|(k, _)| k == name)
    .map(|(_, v)| v.into_owned())
}

fn last_segment(path: &str) -> &str {
  path.rsplit('/').next().unwrap_or(path)
}

/// Id of the novel owning a nested collection such as `/api/novels/3/chapters`.
fn parent_novel(path: &str) -> Option<&str> {
  let mut segments = path.trim_end_matches('/').rsplit('/');
  let _collection = segments.next()?;
  let id = segments.next()?;
  (segments.next()? == "novels").then_some(id)
}

fn numeric_id(value: &Value) -> Option<u64> {
  match value {
    Value::Number(n) => n.as_u64(),
    Value::String(s) => s.parse().ok(),
    _ => None,
  }
}

fn id_matches(item: &Value, id: &str) -> bool {
  match item.get("id") {
    Some(Value::String(s)) => s == id,
    Some(Value::Number(n)) => n.to_string() == id,
    _ => false,
  }
}

/// Items with any string field containing `q`, case-insensitively.
fn filter_matching<'a>(items: impl Iterator<Item = &'a Value>, q: &str) -> Vec<Value> {
  let needle = q.trim().to_lowercase();
  items
    .filter(|item| {
      needle.is_empty()
        || item.as_object().is_some_and(|fields| {
          fields
            .values()
            .filter_map(Value::as_str)
            .any(|s| s.to_lowercase().contains(&needle))
        })
    })
    .cloned()
    .collect()
}

fn merge_non_null(fields: &mut Map<String, Value>, changes: Map<String, Value>) {
  for (name, value) in changes {
    if name == "id" || value.is_null() {
      continue;
    }
    fields.insert(name, value);
  }
}
