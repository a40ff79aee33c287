//! Local cache of the Giphy trending list.
//!
//! [`cache::SyncCoordinator`] refreshes the cache from a
//! [`giphy::TrendingSource`]; [`cache::Snapshot`] serves what is cached
//! without touching the network.

pub mod cache;
pub mod config;
pub mod error;
pub mod giphy;
pub mod logging;

pub use cache::{RefreshOutcome, Refreshed, Snapshot, SqliteStorage, SyncCoordinator};
pub use error::{NetworkError, StorageError, SyncError};
pub use giphy::{Gif, GiphyClient};
