//! Conversions between API items, cache rows and caller-facing GIFs.

use chrono::{DateTime, NaiveDateTime, Utc};

use super::api_types::ApiGif;
use super::types::Gif;
use crate::cache::CacheEntry;

/// Format of `import_datetime` in API responses.
const IMPORT_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Turn one API response into fresh (non-dirty) cache rows.
///
/// `now` is used for every item that lacks a usable import time, so rows from
/// a single import keep their relative order through `position`.
pub fn to_cache_entries(items: Vec<ApiGif>, now: DateTime<Utc>) -> Vec<CacheEntry> {
  items
    .into_iter()
    .enumerate()
    .map(|(position, item)| to_cache_entry(item, position as u32, now))
    .collect()
}

pub fn to_cache_entry(item: ApiGif, position: u32, now: DateTime<Utc>) -> CacheEntry {
  let imported_at = item
    .import_datetime
    .as_deref()
    .and_then(parse_import_datetime)
    .unwrap_or(now);

  let preview = item.images.fixed_height.unwrap_or_default();
  let original = item.images.original.unwrap_or_default();

  CacheEntry {
    id: item.id,
    title: item.title,
    page_url: item.url,
    preview_width: parse_dimension(&preview.width),
    preview_height: parse_dimension(&preview.height),
    preview_url: preview.url,
    original_url: original.url,
    imported_at,
    position,
    dirty: false,
  }
}

impl From<CacheEntry> for Gif {
  fn from(entry: CacheEntry) -> Self {
    Gif {
      id: entry.id,
      title: entry.title,
      page_url: entry.page_url,
      preview_url: entry.preview_url,
      preview_width: entry.preview_width,
      preview_height: entry.preview_height,
      original_url: entry.original_url,
      imported_at: entry.imported_at,
    }
  }
}

pub fn to_gifs(entries: Vec<CacheEntry>) -> Vec<Gif> {
  entries.into_iter().map(Gif::from).collect()
}

/// Parse an API import time. Zeroed dates ("0000-00-00 00:00:00") yield None.
fn parse_import_datetime(s: &str) -> Option<DateTime<Utc>> {
  NaiveDateTime::parse_from_str(s.trim(), IMPORT_DATETIME_FORMAT)
    .ok()
    .map(|dt| dt.and_utc())
}

fn parse_dimension(value: &str) -> u32 {
  value.trim().parse().unwrap_or(0)
}
