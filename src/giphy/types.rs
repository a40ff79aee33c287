use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A trending GIF as shown to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Gif {
  pub id: String,
  pub title: String,
  pub page_url: String,
  pub preview_url: String,
  pub preview_width: u32,
  pub preview_height: u32,
  pub original_url: String,
  pub imported_at: DateTime<Utc>,
}

/// Content rating filter understood by the trending endpoint
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
  #[default]
  G,
  Pg,
  #[serde(rename = "pg-13")]
  Pg13,
  R,
}

impl Rating {
  pub fn as_str(self) -> &'static str {
    match self {
      Rating::G => "g",
      Rating::Pg => "pg",
      Rating::Pg13 => "pg-13",
      Rating::R => "r",
    }
  }
}

impl std::fmt::Display for Rating {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}
