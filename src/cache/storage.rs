//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::entry::CacheEntry;
use crate::error::StorageError;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Trait for cache storage backends.
///
/// Every call is atomic on its own. Sequencing several calls into a refresh
/// cycle is the job of [`super::SyncCoordinator`].
pub trait CacheStorage: Send + Sync {
  /// Insert an entry, replacing any row with the same id.
  fn insert_or_replace(&self, entry: &CacheEntry) -> StorageResult<()>;

  /// Insert or replace a batch of entries in one transaction.
  fn insert_or_replace_all(&self, entries: &[CacheEntry]) -> StorageResult<()>;

  /// All rows, newest import first.
  fn query_all_ordered_by_time_desc(&self) -> StorageResult<Vec<CacheEntry>>;

  /// Remove every row.
  fn clear_all(&self) -> StorageResult<()>;

  /// Flag every row as dirty. Returns the number of rows touched.
  fn mark_all_dirty(&self) -> StorageResult<usize>;

  /// Delete rows still flagged dirty. Returns the number of rows deleted.
  fn delete_where_dirty(&self) -> StorageResult<usize>;

  /// Number of rows currently cached.
  fn count(&self) -> StorageResult<usize>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
  path: Option<PathBuf>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open_at(path: &Path) -> StorageResult<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|source| StorageError::Io {
        path: parent.to_path_buf(),
        source,
      })?;
    }

    let conn = Connection::open(path)?;

    // Lets other processes read while a refresh writes
    let mode: String =
      conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    tracing::debug!(path = %path.display(), journal_mode = %mode, "Opened cache database");

    let storage = Self {
      conn: Mutex::new(conn),
      path: Some(path.to_path_buf()),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Open an existing cache database for reading only.
  ///
  /// Nothing is created or migrated; a missing file is an error.
  pub fn open_read_only(path: &Path) -> StorageResult<Self> {
    let conn = Connection::open_with_flags(
      path,
      OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    tracing::debug!(path = %path.display(), "Opened cache database read-only");

    Ok(Self {
      conn: Mutex::new(conn),
      path: Some(path.to_path_buf()),
    })
  }

  /// Open a private in-memory cache. Nothing survives the process.
  pub fn open_in_memory() -> StorageResult<Self> {
    let storage = Self {
      conn: Mutex::new(Connection::open_in_memory()?),
      path: None,
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Location of the database file, if it is file-backed.
  pub fn path(&self) -> Option<&Path> {
    self.path.as_deref()
  }

  /// Get the default database path.
  pub fn default_path() -> StorageResult<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| StorageError::Io {
        path: PathBuf::from("~"),
        source: std::io::Error::new(
          std::io::ErrorKind::NotFound,
          "Could not determine data directory",
        ),
      })?;

    Ok(data_dir.join("trendcache").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> StorageResult<()> {
    self.lock()?.execute_batch(CACHE_SCHEMA)?;
    Ok(())
  }

  fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|_| StorageError::LockPoisoned)
  }

  /// Make SQLite abort any insert of `id`, so a batch write fails midway.
  #[cfg(test)]
  pub(crate) fn reject_inserts_of(&self, id: &str) -> StorageResult<()> {
    self.lock()?.execute_batch(&format!(
      "CREATE TRIGGER reject_insert BEFORE INSERT ON trending_entries
       WHEN NEW.id = '{}'
       BEGIN SELECT RAISE(ABORT, 'insert rejected'); END;",
      id.replace('\'', "''"),
    ))?;
    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS trending_entries (
    id TEXT PRIMARY KEY NOT NULL,
    title TEXT NOT NULL,
    page_url TEXT NOT NULL,
    preview_url TEXT NOT NULL,
    preview_width INTEGER NOT NULL,
    preview_height INTEGER NOT NULL,
    original_url TEXT NOT NULL,
    imported_at INTEGER NOT NULL,
    position INTEGER NOT NULL,
    dirty INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_trending_entries_imported
    ON trending_entries(imported_at DESC, position);

CREATE INDEX IF NOT EXISTS idx_trending_entries_dirty
    ON trending_entries(dirty);
"#;

const INSERT_OR_REPLACE: &str = "INSERT OR REPLACE INTO trending_entries
   (id, title, page_url, preview_url, preview_width, preview_height,
    original_url, imported_at, position, dirty)
   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

impl CacheStorage for SqliteStorage {
  fn insert_or_replace(&self, entry: &CacheEntry) -> StorageResult<()> {
    let conn = self.lock()?;
    insert_entry(&conn, entry)
  }

  fn insert_or_replace_all(&self, entries: &[CacheEntry]) -> StorageResult<()> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    for entry in entries {
      insert_entry(&tx, entry)?;
    }

    tx.commit()?;
    Ok(())
  }

  fn query_all_ordered_by_time_desc(&self) -> StorageResult<Vec<CacheEntry>> {
    let conn = self.lock()?;

    let mut stmt = conn.prepare(
      "SELECT id, title, page_url, preview_url, preview_width, preview_height,
              original_url, imported_at, position, dirty
       FROM trending_entries
       ORDER BY imported_at DESC, position ASC",
    )?;

    // A bad row fails the whole read instead of being skipped
    let rows = stmt
      .query_map([], RawRow::from_row)?
      .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter().map(RawRow::into_entry).collect()
  }

  fn clear_all(&self) -> StorageResult<()> {
    self.lock()?.execute("DELETE FROM trending_entries", [])?;
    Ok(())
  }

  fn mark_all_dirty(&self) -> StorageResult<usize> {
    let touched = self
      .lock()?
      .execute("UPDATE trending_entries SET dirty = 1", [])?;
    Ok(touched)
  }

  fn delete_where_dirty(&self) -> StorageResult<usize> {
    let deleted = self
      .lock()?
      .execute("DELETE FROM trending_entries WHERE dirty = 1", [])?;
    Ok(deleted)
  }

  fn count(&self) -> StorageResult<usize> {
    let count: i64 =
      self
        .lock()?
        .query_row("SELECT COUNT(*) FROM trending_entries", [], |row| row.get(0))?;
    Ok(count as usize)
  }
}

fn insert_entry(conn: &Connection, entry: &CacheEntry) -> StorageResult<()> {
  conn.execute(
    INSERT_OR_REPLACE,
    params![
      entry.id,
      entry.title,
      entry.page_url,
      entry.preview_url,
      entry.preview_width,
      entry.preview_height,
      entry.original_url,
      entry.imported_at.timestamp_millis(),
      entry.position,
      entry.dirty,
    ],
  )?;
  Ok(())
}

/// Column values as SQLite hands them back, before validation.
struct RawRow {
  id: String,
  title: String,
  page_url: String,
  preview_url: String,
  preview_width: u32,
  preview_height: u32,
  original_url: String,
  imported_at: i64,
  position: u32,
  dirty: bool,
}

impl RawRow {
  fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id: row.get(0)?,
      title: row.get(1)?,
      page_url: row.get(2)?,
      preview_url: row.get(3)?,
      preview_width: row.get(4)?,
      preview_height: row.get(5)?,
      original_url: row.get(6)?,
      imported_at: row.get(7)?,
      position: row.get(8)?,
      dirty: row.get(9)?,
    })
  }

  fn into_entry(self) -> StorageResult<CacheEntry> {
    let imported_at =
      DateTime::<Utc>::from_timestamp_millis(self.imported_at).ok_or_else(|| {
        StorageError::Corrupt {
          id: self.id.clone(),
          reason: format!("imported_at {} is out of range", self.imported_at),
        }
      })?;

    Ok(CacheEntry {
      id: self.id,
      title: self.title,
      page_url: self.page_url,
      preview_url: self.preview_url,
      preview_width: self.preview_width,
      preview_height: self.preview_height,
      original_url: self.original_url,
      imported_at,
      position: self.position,
      dirty: self.dirty,
    })
  }
}
