use std::time::Duration;

/// Configuration for resource cache behavior.
///
/// Controls when subscriptions revalidate cached data and how long
/// unreferenced entries are retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
  /// How long fetched data is considered fresh.
  ///
  /// Subscribing to a `Ready` entry older than this serves the cached data and
  /// revalidates in the background.
  pub stale_time: Duration,

  /// How long an entry with no subscribers, no pending mutation and no
  /// in-flight fetch is kept before a gc pass evicts it.
  pub cache_time: Duration,

  /// Cadence of the background gc task started by `spawn_gc`.
  pub gc_interval: Duration,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_time: Duration::from_secs(60),
      cache_time: Duration::from_secs(5 * 60),
      gc_interval: Duration::from_secs(60),
    }
  }
}

impl CacheConfig {
  #[must_use]
  pub const fn new(stale_time: Duration, cache_time: Duration) -> Self {
    Self {
      stale_time,
      cache_time,
      gc_interval: Duration::from_secs(60),
    }
  }

  #[must_use]
  pub const fn with_gc_interval(mut self, gc_interval: Duration) -> Self {
    self.gc_interval = gc_interval;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_config() {
    let config = CacheConfig::default();
    assert_eq!(config.stale_time, Duration::from_secs(60));
    assert_eq!(config.cache_time, Duration::from_secs(300));
    assert_eq!(config.gc_interval, Duration::from_secs(60));
  }

  #[test]
  fn test_new_config() {
    let config = CacheConfig::new(Duration::from_secs(30), Duration::ZERO)
      .with_gc_interval(Duration::from_secs(5));
    assert_eq!(config.stale_time, Duration::from_secs(30));
    assert_eq!(config.cache_time, Duration::ZERO);
    assert_eq!(config.gc_interval, Duration::from_secs(5));
  }
}
