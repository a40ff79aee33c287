//! Local cache of trending GIFs and the refresh protocol that keeps it current.
//!
//! A refresh cycle marks every cached row dirty, fetches the live list,
//! writes it back (which clears the flag on rows that are still trending),
//! then deletes whatever is still dirty. Readers go through [`Snapshot`] and
//! never trigger network activity.

mod entry;
mod snapshot;
mod storage;
mod sync;

pub use entry::CacheEntry;
pub use snapshot::Snapshot;
pub use storage::{CacheStorage, SqliteStorage, StorageResult};
pub use sync::{RefreshOutcome, Refreshed, SyncCoordinator};
