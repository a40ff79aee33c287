//! Read-only view over the cache.

use std::sync::Arc;

use super::storage::CacheStorage;
use crate::error::StorageError;
use crate::giphy::{mapper, Gif};

/// Reads the current cache contents without touching the network.
///
/// Rows flagged dirty by an in-flight or failed refresh are still returned.
pub struct Snapshot<S: CacheStorage> {
  storage: Arc<S>,
}

impl<S: CacheStorage> Snapshot<S> {
  pub fn new(storage: Arc<S>) -> Self {
    Self { storage }
  }

  /// Every cached GIF, newest import first.
  pub fn current_snapshot(&self) -> Result<Vec<Gif>, StorageError> {
    let entries = self.storage.query_all_ordered_by_time_desc()?;
    Ok(mapper::to_gifs(entries))
  }

  /// Number of cached GIFs, dirty rows included.
  pub fn len(&self) -> Result<usize, StorageError> {
    self.storage.count()
  }

  /// Whether the cache holds nothing at all.
  pub fn is_empty(&self) -> Result<bool, StorageError> {
    Ok(self.len()? == 0)
  }
}

impl<S: CacheStorage> Clone for Snapshot<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
    }
  }
}
