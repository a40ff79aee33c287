use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::SqliteStorage;
use crate::giphy::Rating;

const DEFAULT_API_URL: &str = "https://api.giphy.com/v1";
const FALLBACK_REQUEST_LIMIT: u32 = 25;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub giphy: GiphyConfig,
  /// Number of items requested per refresh
  #[serde(default = "default_request_limit")]
  pub request_limit: u32,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GiphyConfig {
  #[serde(default = "default_api_url")]
  pub url: String,
  #[serde(default)]
  pub rating: Rating,
  /// Upper bound for one trending request, in seconds
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
  /// Database file (defaults to $XDG_DATA_HOME/trendcache/cache.db)
  pub path: Option<PathBuf>,
}

/// Request limit baked in at build time via `TRENDCACHE_DEFAULT_LIMIT`.
pub fn default_request_limit() -> u32 {
  option_env!("TRENDCACHE_DEFAULT_LIMIT")
    .and_then(|v| v.parse().ok())
    .filter(|limit| *limit > 0)
    .unwrap_or(FALLBACK_REQUEST_LIMIT)
}

fn default_api_url() -> String {
  DEFAULT_API_URL.to_string()
}

fn default_timeout_secs() -> u64 {
  10
}

impl Default for GiphyConfig {
  fn default() -> Self {
    Self {
      url: default_api_url(),
      rating: Rating::default(),
      timeout_secs: default_timeout_secs(),
    }
  }
}

impl GiphyConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      giphy: GiphyConfig::default(),
      request_limit: default_request_limit(),
      cache: CacheConfig::default(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./trendcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/trendcache/config.yaml
  ///
  /// Built-in defaults apply when no file is found.
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("trendcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("trendcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  /// Parse and validate a YAML document.
  pub fn from_yaml(contents: &str) -> Result<Self> {
    // An empty file is a valid, all-defaults config
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }

    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.request_limit == 0 {
      return Err(eyre!("request_limit must be at least 1"));
    }
    if self.giphy.timeout_secs == 0 {
      return Err(eyre!("giphy.timeout_secs must be at least 1"));
    }
    Ok(())
  }

  /// Location of the cache database.
  pub fn cache_path(&self) -> Result<PathBuf> {
    match &self.cache.path {
      Some(path) => Ok(path.clone()),
      None => Ok(SqliteStorage::default_path()?),
    }
  }

  /// Directory for log files, next to the cache database.
  pub fn log_dir(&self) -> Result<PathBuf> {
    let cache_path = self.cache_path()?;
    let parent = cache_path
      .parent()
      .ok_or_else(|| eyre!("Cache path {} has no parent", cache_path.display()))?;
    Ok(parent.join("logs"))
  }

  /// Get the Giphy API key from environment variables.
  ///
  /// Checks TRENDCACHE_API_KEY first, then GIPHY_API_KEY as fallback.
  pub fn get_api_key() -> Result<String> {
    std::env::var("TRENDCACHE_API_KEY")
      .or_else(|_| std::env::var("GIPHY_API_KEY"))
      .map_err(|_| {
        eyre!("Giphy API key not found. Set TRENDCACHE_API_KEY or GIPHY_API_KEY environment variable.")
      })
  }
}
