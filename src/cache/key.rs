use url::Url;

/// Normalized cache key for a URL.
///
/// `url` is the URL without its fragment. `base` additionally drops the query string
/// and is what query-insensitive lookups compare against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  pub url: String,
  pub base: String,
}

impl CacheKey {
  pub fn from_url(url: &Url) -> Self {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    let full = normalized.to_string();

    normalized.set_query(None);
    Self {
      url: full,
      base: normalized.to_string(),
    }
  }
}
