//! Giphy trending API: wire types, client, and mapping into cache rows.

pub mod api_types;
pub mod client;
pub mod mapper;
pub mod source;
pub mod types;

pub use api_types::{ApiGif, TrendingResponse};
pub use client::GiphyClient;
pub use source::TrendingSource;
pub use types::{Gif, Rating};
