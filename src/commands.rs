//! Subcommand implementations for the `trendcache` binary.

use color_eyre::{eyre::WrapErr, Result};
use std::path::Path;
use std::sync::Arc;

use trendcache::cache::CacheStorage;
use trendcache::config::Config;
use trendcache::{Gif, GiphyClient, Snapshot, SqliteStorage, SyncCoordinator};

const TITLE_WIDTH: usize = 48;

/// Refresh the cache from the API and print the result.
pub async fn refresh(config: &Config, limit: Option<u32>) -> Result<()> {
  let api_key = Config::get_api_key()?;
  let limit = limit.unwrap_or(config.request_limit);

  let client = GiphyClient::new(&config.giphy)?;
  let coordinator = SyncCoordinator::new(open_storage(config)?, client, api_key)
    .with_rating(config.giphy.rating)
    .with_fetch_timeout(config.giphy.timeout());

  match coordinator.reload_until(limit, interrupted()).await {
    Ok(refreshed) => {
      print_items(&refreshed.items);
      eprintln!(
        "Fetched {} items, evicted {} stale, {} cached",
        refreshed.fetched,
        refreshed.evicted,
        refreshed.items.len()
      );
      Ok(())
    }
    Err(err) => {
      if err.left_previous_rows() {
        if let Ok(cached) = coordinator.snapshot().len() {
          eprintln!("Cache still holds {} items from before this refresh", cached);
        }
      }
      Err(err).wrap_err("Refresh did not complete")
    }
  }
}

/// Print what is cached, without network access.
pub fn show(config: &Config, json: bool) -> Result<()> {
  let items = read_cached(&config.cache_path()?)?;

  if json {
    println!("{}", serde_json::to_string_pretty(&items)?);
  } else if items.is_empty() {
    println!("Cache is empty. Run `trendcache refresh` to fetch the trending list.");
  } else {
    print_items(&items);
  }

  Ok(())
}

/// Drop every cached row.
pub fn clear(config: &Config) -> Result<()> {
  let storage = open_storage(config)?;
  let removed = storage.count()?;
  storage.clear_all().wrap_err("Failed to clear cache")?;
  tracing::info!(removed, "Cleared cache");
  println!("Removed {} cached items", removed);
  Ok(())
}

/// Read the cache without creating or modifying the database file.
fn read_cached(path: &Path) -> Result<Vec<Gif>> {
  if !path.exists() {
    tracing::debug!(path = %path.display(), "No cache database yet");
    return Ok(Vec::new());
  }

  let storage = SqliteStorage::open_read_only(path)
    .wrap_err_with(|| format!("Failed to open cache at {}", path.display()))?;
  Snapshot::new(Arc::new(storage))
    .current_snapshot()
    .wrap_err("Failed to read cache")
}

/// Open the cache for writing, creating the file and its directory if needed.
fn open_storage(config: &Config) -> Result<SqliteStorage> {
  let path = config.cache_path()?;
  SqliteStorage::open_at(&path)
    .wrap_err_with(|| format!("Failed to open cache at {}", path.display()))
}

/// Resolves on Ctrl-C. Never resolves if no signal handler can be installed.
async fn interrupted() {
  if tokio::signal::ctrl_c().await.is_err() {
    std::future::pending::<()>().await;
  }
  tracing::info!("Interrupted, cancelling refresh");
}

fn print_items(items: &[Gif]) {
  for (index, gif) in items.iter().enumerate() {
    println!("{}", format_item(index, gif));
  }
}

fn format_item(index: usize, gif: &Gif) -> String {
  let title = match gif.title.trim() {
    "" => "(untitled)",
    title => title,
  };

  format!(
    "{:>3}. {:<width$}  {}  {}",
    index + 1,
    truncate(title, TITLE_WIDTH),
    gif.imported_at.format("%Y-%m-%d"),
    gif.preview_url,
    width = TITLE_WIDTH
  )
}

/// Truncate a string to a maximum number of characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}
