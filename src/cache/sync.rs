//! Refresh protocol that keeps the cache in step with the trending list.

use chrono::Utc;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::Instrument;

use super::snapshot::Snapshot;
use super::storage::CacheStorage;
use crate::error::{NetworkError, SyncError};
use crate::giphy::{mapper, Gif, Rating, TrendingSource};

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of a completed refresh cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refreshed {
  /// Cache contents after the cycle, newest import first
  pub items: Vec<Gif>,
  /// Items returned by the API
  pub fetched: usize,
  /// Stale rows removed because the API no longer returned them
  pub evicted: usize,
}

pub type RefreshOutcome = Result<Refreshed, SyncError>;

/// Runs refresh cycles against one cache.
///
/// Only one cycle runs at a time per coordinator; a second `reload` while one
/// is in flight fails with [`SyncError::RefreshInFlight`] instead of queueing.
pub struct SyncCoordinator<S: CacheStorage, N: TrendingSource> {
  storage: Arc<S>,
  source: N,
  api_key: String,
  rating: Rating,
  fetch_timeout: Duration,
  refresh_gate: Mutex<()>,
}

impl<S: CacheStorage, N: TrendingSource> SyncCoordinator<S, N> {
  pub fn new(storage: S, source: N, api_key: impl Into<String>) -> Self {
    Self {
      storage: Arc::new(storage),
      source,
      api_key: api_key.into(),
      rating: Rating::default(),
      fetch_timeout: DEFAULT_FETCH_TIMEOUT,
      refresh_gate: Mutex::new(()),
    }
  }

  /// Set the content rating requested from the API.
  pub fn with_rating(mut self, rating: Rating) -> Self {
    self.rating = rating;
    self
  }

  /// Set how long the network step may take before it counts as failed.
  pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
    self.fetch_timeout = fetch_timeout;
    self
  }

  /// Reader over the same storage.
  pub fn snapshot(&self) -> Snapshot<S> {
    Snapshot::new(Arc::clone(&self.storage))
  }

  /// Run one refresh cycle requesting up to `limit` items.
  pub async fn reload(&self, limit: u32) -> RefreshOutcome {
    self.reload_until(limit, std::future::pending::<()>()).await
  }

  /// Run one refresh cycle, giving up when `cancel` completes.
  ///
  /// Cancellation is observed before any storage change and while waiting on
  /// the network. Once fresh rows are being written the cycle runs to the
  /// end. Steps that already ran are not rolled back, so a cancelled cycle
  /// leaves the previous rows in place, flagged dirty.
  pub async fn reload_until<C>(&self, limit: u32, cancel: C) -> RefreshOutcome
  where
    C: Future<Output = ()>,
  {
    let _in_flight = self.refresh_gate.try_lock().map_err(|_| {
      tracing::debug!(limit, "Refresh requested while another is running");
      SyncError::RefreshInFlight
    })?;

    let span = tracing::info_span!("reload", limit, rating = %self.rating);
    self.run_cycle(limit, cancel).instrument(span).await
  }

  async fn run_cycle<C>(&self, limit: u32, cancel: C) -> RefreshOutcome
  where
    C: Future<Output = ()>,
  {
    tokio::pin!(cancel);

    if cancel.as_mut().now_or_never().is_some() {
      return Err(abort("start", SyncError::Cancelled));
    }

    // 1. Everything cached so far is suspect until the API confirms it
    let marked = self
      .storage
      .mark_all_dirty()
      .map_err(|e| abort("mark_dirty", e))?;
    tracing::debug!(marked, "Marked cached rows dirty");

    // 2. Fetch. On failure storage is left as is: all rows dirty.
    let fetch = tokio::time::timeout(
      self.fetch_timeout,
      self
        .source
        .fetch_trending(&self.api_key, limit, self.rating),
    );

    let response = tokio::select! {
      biased;
      _ = cancel.as_mut() => return Err(abort("fetch", SyncError::Cancelled)),
      result = fetch => match result {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => return Err(abort("fetch", e)),
        Err(_) => return Err(abort("fetch", NetworkError::Timeout(self.fetch_timeout))),
      },
    };

    if cancel.as_mut().now_or_never().is_some() {
      return Err(abort("fetch", SyncError::Cancelled));
    }

    // 3. Replace rows with fresh, non-dirty copies
    let entries = mapper::to_cache_entries(response.data, Utc::now());
    let fetched = entries.len();
    self
      .storage
      .insert_or_replace_all(&entries)
      .map_err(|e| abort("insert", e))?;
    tracing::debug!(fetched, "Stored fresh rows");

    // 4. Anything still dirty was not in this response
    let evicted = self
      .storage
      .delete_where_dirty()
      .map_err(|e| abort("evict", e))?;

    // 5. Read back in display order
    let entries = self
      .storage
      .query_all_ordered_by_time_desc()
      .map_err(|e| abort("read", e))?;
    let items = mapper::to_gifs(entries);

    tracing::info!(fetched, evicted, cached = items.len(), "Refresh complete");

    Ok(Refreshed {
      items,
      fetched,
      evicted,
    })
  }
}

fn abort(step: &'static str, err: impl Into<SyncError>) -> SyncError {
  let err = err.into();
  tracing::warn!(step, error = %err, "Refresh aborted");
  err
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheEntry, SqliteStorage, StorageResult};
  use crate::error::StorageError;
  use crate::giphy::api_types::{ApiImages, ApiRendition};
  use crate::giphy::client::decode_trending;
  use crate::giphy::{ApiGif, TrendingResponse};
  use async_trait::async_trait;
  use std::collections::VecDeque;
  use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

  enum Scripted {
    Items(Vec<ApiGif>),
    /// Raw response body, decoded the way the HTTP client does
    Body(&'static str),
    Fail,
    Hang,
  }

  /// Trending source that replays a fixed list of responses.
  struct ScriptedSource {
    script: std::sync::Mutex<VecDeque<Scripted>>,
    delay: Duration,
    calls: AtomicUsize,
    last_limit: AtomicU32,
  }

  impl ScriptedSource {
    fn new(script: Vec<Scripted>) -> Self {
      Self {
        script: std::sync::Mutex::new(script.into()),
        delay: Duration::ZERO,
        calls: AtomicUsize::new(0),
        last_limit: AtomicU32::new(0),
      }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
      self.delay = delay;
      self
    }
  }

  #[async_trait]
  impl TrendingSource for ScriptedSource {
    async fn fetch_trending(
      &self,
      _api_key: &str,
      limit: u32,
      _rating: Rating,
    ) -> Result<TrendingResponse, NetworkError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self.last_limit.store(limit, Ordering::SeqCst);
      let next = {
        let mut script = self.script.lock().unwrap();
        script.pop_front().unwrap_or(Scripted::Fail)
      };

      if !self.delay.is_zero() {
        tokio::time::sleep(self.delay).await;
      }

      match next {
        Scripted::Items(items) => Ok(TrendingResponse {
          data: items.into_iter().take(limit as usize).collect(),
          pagination: None,
          meta: None,
        }),
        Scripted::Body(body) => decode_trending(body.as_bytes()),
        Scripted::Fail => Err(NetworkError::Status {
          status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
          body: "upstream down".to_string(),
        }),
        Scripted::Hang => std::future::pending().await,
      }
    }
  }

  #[derive(Clone, Copy, PartialEq, Eq)]
  enum Step {
    MarkDirty,
    Evict,
    Read,
  }

  /// SQLite storage that fails with an I/O error at one chosen step.
  struct FailingStorage {
    inner: SqliteStorage,
    fail_at: Step,
  }

  impl FailingStorage {
    fn new(fail_at: Step) -> Self {
      Self {
        inner: SqliteStorage::open_in_memory().unwrap(),
        fail_at,
      }
    }

    fn check(&self, step: Step) -> StorageResult<()> {
      if self.fail_at == step {
        return Err(StorageError::Sqlite(rusqlite::Error::SqliteFailure(
          rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_IOERR),
          Some("disk I/O error".to_string()),
        )));
      }
      Ok(())
    }
  }

  impl CacheStorage for FailingStorage {
    fn insert_or_replace(&self, entry: &CacheEntry) -> StorageResult<()> {
      self.inner.insert_or_replace(entry)
    }
    fn insert_or_replace_all(&self, entries: &[CacheEntry]) -> StorageResult<()> {
      self.inner.insert_or_replace_all(entries)
    }
    fn query_all_ordered_by_time_desc(&self) -> StorageResult<Vec<CacheEntry>> {
      self.check(Step::Read)?;
      self.inner.query_all_ordered_by_time_desc()
    }
    fn clear_all(&self) -> StorageResult<()> {
      self.inner.clear_all()
    }
    fn mark_all_dirty(&self) -> StorageResult<usize> {
      self.check(Step::MarkDirty)?;
      self.inner.mark_all_dirty()
    }
    fn delete_where_dirty(&self) -> StorageResult<usize> {
      self.check(Step::Evict)?;
      self.inner.delete_where_dirty()
    }
    fn count(&self) -> StorageResult<usize> {
      self.inner.count()
    }
  }

  fn cached(id: &str) -> CacheEntry {
    CacheEntry {
      id: id.to_string(),
      title: id.to_string(),
      page_url: String::new(),
      preview_url: String::new(),
      preview_width: 0,
      preview_height: 0,
      original_url: String::new(),
      imported_at: Utc::now(),
      position: 0,
      dirty: false,
    }
  }

  fn is_io_failure(err: &SyncError) -> bool {
    matches!(
      err,
      SyncError::Storage(StorageError::Sqlite(rusqlite::Error::SqliteFailure(e, _)))
        if e.code == rusqlite::ErrorCode::SystemIoFailure
    )
  }

  fn gif(id: &str, imported: Option<&str>) -> ApiGif {
    ApiGif {
      id: id.to_string(),
      title: format!("{} GIF", id),
      url: format!("https://giphy.com/gifs/{}", id),
      import_datetime: imported.map(String::from),
      images: ApiImages {
        fixed_height: Some(ApiRendition {
          url: format!("https://media.giphy.com/media/{}/200.gif", id),
          width: "200".to_string(),
          height: "200".to_string(),
        }),
        original: Some(ApiRendition {
          url: format!("https://media.giphy.com/media/{}/giphy.gif", id),
          width: "480".to_string(),
          height: "480".to_string(),
        }),
      },
    }
  }

  fn dated(id: &str, day: u32) -> ApiGif {
    gif(id, Some(&format!("2024-01-{:02} 12:00:00", day)))
  }

  fn coordinator(script: Vec<Scripted>) -> SyncCoordinator<SqliteStorage, ScriptedSource> {
    SyncCoordinator::new(
      SqliteStorage::open_in_memory().unwrap(),
      ScriptedSource::new(script),
      "test-key",
    )
  }

  fn ids(items: &[Gif]) -> Vec<&str> {
    items.iter().map(|g| g.id.as_str()).collect()
  }

  fn stored_ids<S: CacheStorage>(storage: &S) -> Vec<(String, bool)> {
    let mut rows: Vec<(String, bool)> = storage
      .query_all_ordered_by_time_desc()
      .unwrap()
      .into_iter()
      .map(|e| (e.id, e.dirty))
      .collect();
    rows.sort();
    rows
  }

  #[tokio::test]
  async fn test_stale_rows_are_evicted_and_new_rows_added() {
    let sync = coordinator(vec![
      Scripted::Items(vec![dated("a", 1), dated("b", 2)]),
      Scripted::Items(vec![dated("b", 2), dated("c", 3)]),
    ]);

    let first = sync.reload(25).await.unwrap();
    assert_eq!(ids(&first.items), vec!["b", "a"]);

    let second = sync.reload(25).await.unwrap();
    assert_eq!(ids(&second.items), vec!["c", "b"]);
    assert_eq!(second.fetched, 2);
    assert_eq!(second.evicted, 1);
    assert_eq!(
      stored_ids(sync.storage.as_ref()),
      vec![("b".to_string(), false), ("c".to_string(), false)]
    );
  }

  #[tokio::test]
  async fn test_empty_response_on_empty_cache() {
    let sync = coordinator(vec![Scripted::Items(vec![])]);

    let refreshed = sync.reload(25).await.unwrap();
    assert!(refreshed.items.is_empty());
    assert!(sync.snapshot().current_snapshot().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_empty_response_clears_previous_rows() {
    let sync = coordinator(vec![
      Scripted::Items(vec![dated("a", 1), dated("b", 2)]),
      Scripted::Items(vec![]),
    ]);
    sync.reload(25).await.unwrap();

    let refreshed = sync.reload(25).await.unwrap();
    assert!(refreshed.items.is_empty());
    assert_eq!(refreshed.evicted, 2);
    assert!(sync.snapshot().is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_network_failure_keeps_previous_rows_readable() {
    let sync = coordinator(vec![Scripted::Items(vec![dated("a", 1)]), Scripted::Fail]);
    let before = sync.reload(25).await.unwrap().items;

    let err = sync.reload(25).await.unwrap_err();
    assert!(matches!(err, SyncError::Network(NetworkError::Status { .. })));
    assert!(err.left_previous_rows());

    // Still flagged dirty internally, still served to readers
    assert_eq!(stored_ids(sync.storage.as_ref()), vec![("a".to_string(), true)]);
    assert_eq!(sync.snapshot().current_snapshot().unwrap(), before);
  }

  #[tokio::test]
  async fn test_next_success_heals_after_failure() {
    let sync = coordinator(vec![
      Scripted::Items(vec![dated("a", 1), dated("b", 2)]),
      Scripted::Fail,
      Scripted::Items(vec![dated("b", 2)]),
    ]);
    sync.reload(25).await.unwrap();
    sync.reload(25).await.unwrap_err();

    let refreshed = sync.reload(25).await.unwrap();
    assert_eq!(ids(&refreshed.items), vec!["b"]);
    assert_eq!(stored_ids(sync.storage.as_ref()), vec![("b".to_string(), false)]);
  }

  #[tokio::test]
  async fn test_identical_reloads_are_idempotent() {
    let sync = coordinator(vec![
      Scripted::Items(vec![dated("x", 5)]),
      Scripted::Items(vec![dated("x", 5)]),
    ]);

    let first = sync.reload(25).await.unwrap();
    let second = sync.reload(25).await.unwrap();

    assert_eq!(first.items, second.items);
    assert_eq!(second.evicted, 0);
    assert_eq!(sync.storage.count().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_result_matches_latest_response_newest_first() {
    let sync = coordinator(vec![
      Scripted::Items(vec![dated("old", 1), dated("z", 9)]),
      Scripted::Items(vec![dated("x", 1), dated("y", 3), dated("z", 2)]),
    ]);
    sync.reload(25).await.unwrap();

    let refreshed = sync.reload(25).await.unwrap();
    assert_eq!(ids(&refreshed.items), vec!["y", "z", "x"]);
    assert!(refreshed
      .items
      .windows(2)
      .all(|w| w[0].imported_at >= w[1].imported_at));
  }

  #[tokio::test]
  async fn test_undated_batch_keeps_response_order() {
    let sync = coordinator(vec![Scripted::Items(vec![
      gif("first", None),
      gif("second", None),
      gif("third", None),
    ])]);

    let refreshed = sync.reload(25).await.unwrap();
    assert_eq!(ids(&refreshed.items), vec!["first", "second", "third"]);
  }

  #[tokio::test]
  async fn test_duplicate_ids_in_one_response_store_one_row() {
    let sync = coordinator(vec![Scripted::Items(vec![dated("a", 1), dated("a", 2)])]);

    let refreshed = sync.reload(25).await.unwrap();
    assert_eq!(ids(&refreshed.items), vec!["a"]);
    assert_eq!(sync.storage.count().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_limit_is_passed_to_source() {
    let sync = coordinator(vec![Scripted::Items(vec![
      dated("a", 1),
      dated("b", 2),
      dated("c", 3),
    ])]);

    let refreshed = sync.reload(2).await.unwrap();
    assert_eq!(sync.source.last_limit.load(Ordering::SeqCst), 2);
    assert_eq!(refreshed.fetched, 2);
  }

  #[tokio::test]
  async fn test_body_without_data_leaves_cache_alone() {
    let sync = coordinator(vec![
      Scripted::Items(vec![dated("a", 1)]),
      Scripted::Body(r#"{"meta":{"status":500,"msg":"Internal Error"}}"#),
      Scripted::Body("{}"),
    ]);
    sync.reload(25).await.unwrap();

    let err = sync.reload(25).await.unwrap_err();
    assert!(matches!(
      err,
      SyncError::Network(NetworkError::Status { status, .. })
        if status == reqwest::StatusCode::INTERNAL_SERVER_ERROR
    ));

    let err = sync.reload(25).await.unwrap_err();
    assert!(matches!(err, SyncError::Network(NetworkError::Decode(_))));
    assert!(err.left_previous_rows());

    assert_eq!(stored_ids(sync.storage.as_ref()), vec![("a".to_string(), true)]);
    assert_eq!(sync.snapshot().len().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_explicit_empty_data_still_clears() {
    let sync = coordinator(vec![
      Scripted::Items(vec![dated("a", 1)]),
      Scripted::Body(r#"{"data":[],"meta":{"status":200,"msg":"OK"}}"#),
    ]);
    sync.reload(25).await.unwrap();

    let refreshed = sync.reload(25).await.unwrap();
    assert_eq!(refreshed.evicted, 1);
    assert!(sync.snapshot().is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_mark_dirty_failure_skips_fetch() {
    let sync = SyncCoordinator::new(
      FailingStorage::new(Step::MarkDirty),
      ScriptedSource::new(vec![Scripted::Items(vec![dated("b", 2)])]),
      "test-key",
    );
    sync.storage.inner.insert_or_replace(&cached("a")).unwrap();

    let err = sync.reload(25).await.unwrap_err();
    assert!(is_io_failure(&err));
    assert!(!err.left_previous_rows());
    assert_eq!(sync.source.calls.load(Ordering::SeqCst), 0);
    assert_eq!(stored_ids(&sync.storage.inner), vec![("a".to_string(), false)]);
  }

  #[tokio::test]
  async fn test_insert_failure_rolls_back_and_skips_eviction() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.insert_or_replace(&cached("a")).unwrap();
    storage.reject_inserts_of("c").unwrap();
    let sync = SyncCoordinator::new(
      storage,
      ScriptedSource::new(vec![Scripted::Items(vec![dated("b", 2), dated("c", 3)])]),
      "test-key",
    );

    let err = sync.reload(25).await.unwrap_err();
    assert!(matches!(err, SyncError::Storage(StorageError::Sqlite(_))));

    // The whole batch rolled back and nothing was evicted
    assert_eq!(stored_ids(sync.storage.as_ref()), vec![("a".to_string(), true)]);
    assert_eq!(ids(&sync.snapshot().current_snapshot().unwrap()), vec!["a"]);
  }

  #[tokio::test]
  async fn test_eviction_failure_is_reported() {
    let sync = SyncCoordinator::new(
      FailingStorage::new(Step::Evict),
      ScriptedSource::new(vec![Scripted::Items(vec![dated("b", 2)])]),
      "test-key",
    );
    sync.storage.inner.insert_or_replace(&cached("a")).unwrap();

    let err = sync.reload(25).await.unwrap_err();
    assert!(is_io_failure(&err));
    assert!(!err.left_previous_rows());
    assert_eq!(
      stored_ids(&sync.storage.inner),
      vec![("a".to_string(), true), ("b".to_string(), false)]
    );
  }

  #[tokio::test]
  async fn test_snapshot_reports_read_failure() {
    let sync = SyncCoordinator::new(
      FailingStorage::new(Step::Read),
      ScriptedSource::new(vec![]),
      "test-key",
    );
    sync.storage.inner.insert_or_replace(&cached("a")).unwrap();

    let err = sync.snapshot().current_snapshot().unwrap_err();
    assert!(matches!(err, StorageError::Sqlite(_)));
  }

  #[tokio::test]
  async fn test_cancel_before_start_leaves_storage_untouched() {
    let sync = coordinator(vec![
      Scripted::Items(vec![dated("a", 1)]),
      Scripted::Items(vec![dated("b", 2)]),
    ]);
    sync.reload(25).await.unwrap();

    let err = sync.reload_until(25, async {}).await.unwrap_err();
    assert!(matches!(err, SyncError::Cancelled));
    assert_eq!(sync.source.calls.load(Ordering::SeqCst), 1);
    assert_eq!(stored_ids(sync.storage.as_ref()), vec![("a".to_string(), false)]);
  }

  #[tokio::test]
  async fn test_cancel_during_fetch() {
    let sync = coordinator(vec![Scripted::Items(vec![dated("a", 1)]), Scripted::Hang]);
    sync.reload(25).await.unwrap();

    let err = sync
      .reload_until(25, tokio::time::sleep(Duration::from_millis(50)))
      .await
      .unwrap_err();
    assert!(matches!(err, SyncError::Cancelled));

    // Mark-dirty already ran and is not rolled back
    assert_eq!(stored_ids(sync.storage.as_ref()), vec![("a".to_string(), true)]);
    assert_eq!(ids(&sync.snapshot().current_snapshot().unwrap()), vec!["a"]);
  }

  #[tokio::test]
  async fn test_slow_fetch_times_out() {
    let sync = coordinator(vec![Scripted::Hang]).with_fetch_timeout(Duration::from_millis(50));

    let err = sync.reload(25).await.unwrap_err();
    assert!(matches!(
      err,
      SyncError::Network(NetworkError::Timeout(d)) if d == Duration::from_millis(50)
    ));
  }

  #[tokio::test]
  async fn test_concurrent_reload_is_rejected() {
    let source = ScriptedSource::new(vec![
      Scripted::Items(vec![dated("a", 1)]),
      Scripted::Items(vec![dated("b", 2)]),
    ])
    .with_delay(Duration::from_millis(200));
    let sync = Arc::new(SyncCoordinator::new(
      SqliteStorage::open_in_memory().unwrap(),
      source,
      "test-key",
    ));

    let background = {
      let sync = Arc::clone(&sync);
      tokio::spawn(async move { sync.reload(25).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = sync.reload(25).await.unwrap_err();
    assert!(matches!(err, SyncError::RefreshInFlight));

    let first = background.await.unwrap().unwrap();
    assert_eq!(ids(&first.items), vec!["a"]);

    // The gate is released once the first cycle finishes
    let second = sync.reload(25).await.unwrap();
    assert_eq!(ids(&second.items), vec!["b"]);
    assert_eq!(sync.source.calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_snapshot_shares_storage_with_coordinator() {
    let sync = coordinator(vec![Scripted::Items(vec![dated("a", 1), dated("b", 2)])]);
    let snapshot = sync.snapshot();
    assert!(snapshot.is_empty().unwrap());

    let refreshed = sync.reload(25).await.unwrap();
    assert_eq!(snapshot.current_snapshot().unwrap(), refreshed.items);
    assert_eq!(snapshot.len().unwrap(), 2);
  }
}
