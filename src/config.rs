use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheConfig;

/// Environment variable that overrides `api.url`
pub const API_URL_ENV: &str = "QUILL_API_URL";

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheSettings,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ApiConfig {
  /// Base URL of the authoring API; resource paths are appended to it
  #[serde(default = "default_api_url")]
  pub url: String,
  /// Per-request timeout in seconds
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: default_api_url(),
      timeout_secs: default_timeout_secs(),
    }
  }
}

fn default_api_url() -> String {
  "http://localhost:8000".to_string()
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CacheSettings {
  /// Ready entries older than this revalidate when subscribed
  #[serde(default = "default_stale_time_secs")]
  pub stale_time_secs: u64,
  /// Unreferenced entries are kept this long before eviction
  #[serde(default = "default_cache_time_secs")]
  pub cache_time_secs: u64,
  #[serde(default = "default_gc_interval_secs")]
  pub gc_interval_secs: u64,
}

impl Default for CacheSettings {
  fn default() -> Self {
    Self {
      stale_time_secs: default_stale_time_secs(),
      cache_time_secs: default_cache_time_secs(),
      gc_interval_secs: default_gc_interval_secs(),
    }
  }
}

fn default_stale_time_secs() -> u64 {
  60
}

fn default_cache_time_secs() -> u64 {
  300
}

fn default_gc_interval_secs() -> u64 {
  60
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./quill.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/quill/config.yaml
  ///
  /// Falls back to defaults when no file is found. `QUILL_API_URL` overrides
  /// the API URL either way.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    Ok(config.with_env_overrides(std::env::var(API_URL_ENV).ok()))
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("quill.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("quill").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    config.validate()?;
    Ok(config)
  }

  fn with_env_overrides(mut self, api_url: Option<String>) -> Self {
    if let Some(url) = api_url.filter(|u| !u.trim().is_empty()) {
      self.api.url = url;
    }
    self
  }

  fn validate(&self) -> Result<()> {
    url::Url::parse(&self.api.url).map_err(|e| eyre!("Invalid api.url {:?}: {}", self.api.url, e))?;
    if self.api.timeout_secs == 0 {
      return Err(eyre!("api.timeout_secs must be greater than zero"));
    }
    Ok(())
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.api.timeout_secs)
  }

  /// Cache tuning in the form the cache takes.
  pub fn cache_config(&self) -> CacheConfig {
    CacheConfig::new(
      Duration::from_secs(self.cache.stale_time_secs),
      Duration::from_secs(self.cache.cache_time_secs),
    )
    .with_gc_interval(Duration::from_secs(self.cache.gc_interval_secs))
  }

  /// Directory for the log file: $XDG_DATA_HOME/quill
  pub fn data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("quill"))
  }
}
