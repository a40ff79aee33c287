use async_trait::async_trait;
use url::Url;

use super::api_types::{ApiMeta, MetaEnvelope, TrendingResponse};
use super::source::TrendingSource;
use super::types::Rating;
use crate::config::GiphyConfig;
use crate::error::NetworkError;

/// Longest slice of an error body kept in [`NetworkError::Status`]
const MAX_ERROR_BODY: usize = 200;

/// Giphy API client wrapper
#[derive(Clone)]
pub struct GiphyClient {
  http: reqwest::Client,
  base_url: Url,
}

impl GiphyClient {
  pub fn new(config: &GiphyConfig) -> Result<Self, NetworkError> {
    let base_url = Url::parse(&config.url)?;

    let http = reqwest::Client::builder()
      .connect_timeout(config.timeout())
      .user_agent(concat!("trendcache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| NetworkError::Transport(e.without_url()))?;

    Ok(Self { http, base_url })
  }

  /// Build the trending endpoint url for one request
  pub fn trending_url(&self, api_key: &str, limit: u32, rating: Rating) -> Result<Url, NetworkError> {
    let mut url = self.base_url.clone();

    url
      .path_segments_mut()
      .map_err(|_| NetworkError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
      .pop_if_empty()
      .extend(["gifs", "trending"]);

    url
      .query_pairs_mut()
      .append_pair("api_key", api_key)
      .append_pair("limit", &limit.to_string())
      .append_pair("rating", rating.as_str());

    Ok(url)
  }
}

#[async_trait]
impl TrendingSource for GiphyClient {
  async fn fetch_trending(
    &self,
    api_key: &str,
    limit: u32,
    rating: Rating,
  ) -> Result<TrendingResponse, NetworkError> {
    let url = self.trending_url(api_key, limit, rating)?;
    tracing::debug!(path = url.path(), limit, %rating, "Fetching trending list");

    // Errors carry the request url, which includes the api key
    let response = self
      .http
      .get(url)
      .send()
      .await
      .map_err(|e| NetworkError::Transport(e.without_url()))?;

    let status = response.status();
    let body = response
      .bytes()
      .await
      .map_err(|e| NetworkError::Transport(e.without_url()))?;

    if !status.is_success() {
      return Err(NetworkError::Status {
        status,
        body: error_body(&String::from_utf8_lossy(&body)),
      });
    }

    decode_trending(&body)
  }
}

/// Decode a trending endpoint body.
///
/// Giphy repeats the status in `meta`, and gateways sometimes answer 200 with
/// an error inside. That is checked before `data`, which must be present.
pub fn decode_trending(body: &[u8]) -> Result<TrendingResponse, NetworkError> {
  let envelope: MetaEnvelope = serde_json::from_slice(body)?;
  if let Some(meta) = &envelope.meta {
    check_meta(meta)?;
  }

  Ok(serde_json::from_slice(body)?)
}

fn check_meta(meta: &ApiMeta) -> Result<(), NetworkError> {
  match reqwest::StatusCode::from_u16(meta.status) {
    Ok(status) if status.is_success() => Ok(()),
    Ok(status) => Err(NetworkError::Status {
      status,
      body: error_body(&meta.msg),
    }),
    Err(_) => Err(NetworkError::Status {
      status: reqwest::StatusCode::BAD_GATEWAY,
      body: format!("unrecognised meta status {}", meta.status),
    }),
  }
}

fn error_body(body: &str) -> String {
  body.chars().take(MAX_ERROR_BODY).collect()
}
