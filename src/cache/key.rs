use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier for a cached collection or entity.
///
/// Two keys are equal iff their string forms are equal. The cache never looks
/// inside a key; transports interpret it (the HTTP transport treats it as a
/// path relative to the API base URL).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
  pub fn new(key: impl Into<String>) -> Self {
    Self(key.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Key of a single member of this collection (`{key}/{id}`).
  pub fn child(&self, id: &str) -> Self {
    Self(format!("{}/{}", self.0.trim_end_matches('/'), id))
  }
}

impl fmt::Display for ResourceKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for ResourceKey {
  fn from(key: &str) -> Self {
    Self(key.to_string())
  }
}

impl From<String> for ResourceKey {
  fn from(key: String) -> Self {
    Self(key)
  }
}

impl From<&ResourceKey> for ResourceKey {
  fn from(key: &ResourceKey) -> Self {
    key.clone()
  }
}

impl Borrow<str> for ResourceKey {
  fn borrow(&self) -> &str {
    &self.0
  }
}

impl AsRef<str> for ResourceKey {
  fn as_ref(&self) -> &str {
    &self.0
  }
}
