//! Row type stored in the trending cache.

use chrono::{DateTime, Utc};

/// A cached trending item.
///
/// `dirty` marks rows that existed before the current refresh cycle and have
/// not been re-supplied by it yet. `position` is the index inside the import
/// batch and breaks ties between rows sharing an `imported_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  pub id: String,
  pub title: String,
  pub page_url: String,
  pub preview_url: String,
  pub preview_width: u32,
  pub preview_height: u32,
  pub original_url: String,
  pub imported_at: DateTime<Utc>,
  pub position: u32,
  pub dirty: bool,
}
