//! Serde-deserializable types matching Giphy API responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs.

use serde::{Deserialize, Deserializer};

// ============================================================================
// Trending endpoint response
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TrendingResponse {
  /// Required: a body without it is an error page, not an empty list
  pub data: Vec<ApiGif>,
  pub pagination: Option<ApiPagination>,
  pub meta: Option<ApiMeta>,
}

#[derive(Debug, Deserialize)]
pub struct ApiPagination {
  #[serde(default)]
  pub total_count: u64,
  #[serde(default)]
  pub count: u64,
  #[serde(default)]
  pub offset: u64,
}

/// Only the `meta` block, readable from error bodies that carry no `data`.
#[derive(Debug, Deserialize)]
pub struct MetaEnvelope {
  pub meta: Option<ApiMeta>,
}

#[derive(Debug, Deserialize)]
pub struct ApiMeta {
  pub status: u16,
  #[serde(default)]
  pub msg: String,
  #[serde(default)]
  pub response_id: String,
}

// ============================================================================
// GIF object
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ApiGif {
  pub id: String,
  #[serde(default)]
  pub title: String,
  /// Page on giphy.com for this GIF
  #[serde(default)]
  pub url: String,
  /// "YYYY-MM-DD HH:MM:SS", sometimes zeroed out
  pub import_datetime: Option<String>,
  #[serde(default)]
  pub images: ApiImages,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiImages {
  pub fixed_height: Option<ApiRendition>,
  pub original: Option<ApiRendition>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiRendition {
  #[serde(default)]
  pub url: String,
  #[serde(default, deserialize_with = "string_or_number")]
  pub width: String,
  #[serde(default, deserialize_with = "string_or_number")]
  pub height: String,
}

/// Giphy sends dimensions as strings, but older payloads used numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  let value = serde_json::Value::deserialize(deserializer)?;
  Ok(match value {
    serde_json::Value::String(s) => s,
    serde_json::Value::Number(n) => n.to_string(),
    _ => String::new(),
  })
}
