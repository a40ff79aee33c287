//! Error types for the cache and its collaborators.
//!
//! The library reports typed errors so callers can tell a flaky network apart
//! from a broken cache file. The binary turns them into `color_eyre` reports.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure talking to the trending API.
#[derive(Debug, Error)]
pub enum NetworkError {
  /// The request did not complete within the fetch timeout
  #[error("Request timed out after {0:?}")]
  Timeout(Duration),

  /// Connection, TLS or protocol failure
  #[error("Transport error: {0}")]
  Transport(#[from] reqwest::Error),

  /// The API answered with a non-success status
  #[error("API returned {status}: {body}")]
  Status {
    status: reqwest::StatusCode,
    body: String,
  },

  /// The body was not the JSON we expected
  #[error("Failed to decode response: {0}")]
  Decode(#[from] serde_json::Error),

  #[error("Invalid API url: {0}")]
  InvalidUrl(#[from] url::ParseError),
}

/// Failure reading or writing the local cache.
#[derive(Debug, Error)]
pub enum StorageError {
  #[error("Cache database error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  /// Another thread panicked while holding the connection
  #[error("Cache connection lock poisoned")]
  LockPoisoned,

  #[error("Failed to prepare cache location {}: {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// A row exists but cannot be turned back into an entry
  #[error("Corrupt cache row {id}: {reason}")]
  Corrupt { id: String, reason: String },
}

/// Why a refresh cycle did not complete.
#[derive(Debug, Error)]
pub enum SyncError {
  #[error("Refresh failed: {0}")]
  Network(#[from] NetworkError),

  #[error("Refresh failed: {0}")]
  Storage(#[from] StorageError),

  /// The caller's cancellation signal fired before the cycle finished
  #[error("Refresh cancelled")]
  Cancelled,

  /// Another refresh on the same coordinator is still running
  #[error("A refresh is already in progress")]
  RefreshInFlight,
}

impl SyncError {
  /// Whether the failure happened before any fresh data reached storage.
  ///
  /// In that case the cache still holds the previous rows (marked dirty).
  pub fn left_previous_rows(&self) -> bool {
    matches!(
      self,
      SyncError::Network(_) | SyncError::Cancelled | SyncError::RefreshInFlight
    )
  }
}
