use async_trait::async_trait;

use super::api_types::TrendingResponse;
use super::types::Rating;
use crate::error::NetworkError;

/// Something that can produce the current trending list.
///
/// One call returns at most `limit` items. Implementations report decoding
/// problems as [`NetworkError::Decode`]; callers never see a half-parsed list.
#[async_trait]
pub trait TrendingSource: Send + Sync {
  async fn fetch_trending(
    &self,
    api_key: &str,
    limit: u32,
    rating: Rating,
  ) -> Result<TrendingResponse, NetworkError>;
}
