//! Request classification: which strategy serves a GET request.

use crate::net::RequestDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  CacheFirst,
  NetworkFirst,
}

/// Extensions of immutable-by-convention assets: scripts, styles, fonts, images.
pub const STATIC_EXTENSIONS: &[&str] = &[
  "js", "mjs", "css", "png", "jpg", "jpeg", "gif", "webp", "svg", "ico", "woff", "woff2",
  "ttf", "otf", "eot",
];

/// Path fragments that mark bundler output or asset directories.
pub const ASSET_MARKERS: &[&str] = &["@vite", "/src/", "/assets/"];

/// Pure classifier; never touches the network.
#[derive(Debug, Clone)]
pub struct StrategySelector {
  api_prefix: String,
}

impl StrategySelector {
  /// `api_prefix` is matched against the request path, e.g. `/api/`.
  pub fn new(api_prefix: impl Into<String>) -> Self {
    Self {
      api_prefix: api_prefix.into(),
    }
  }

  /// True when the request path sits under the API prefix.
  pub fn is_api(&self, request: &RequestDescriptor) -> bool {
    request.path().starts_with(&self.api_prefix)
  }

  /// Rules, first match wins:
  /// 1. API namespace: network-first
  /// 2. Static asset extension: cache-first
  /// 3. Bundler marker or asset directory: cache-first
  /// 4. Documents (HTML, root, navigations): network-first online, cache-first offline
  /// 5. Anything else: cache-first
  pub fn select(&self, request: &RequestDescriptor, online: bool) -> Strategy {
    let path = request.path();

    if self.is_api(request) {
      return Strategy::NetworkFirst;
    }

    if has_static_extension(path) {
      return Strategy::CacheFirst;
    }

    if ASSET_MARKERS.iter().any(|marker| path.contains(marker)) {
      return Strategy::CacheFirst;
    }

    if is_document(request) {
      return if online {
        Strategy::NetworkFirst
      } else {
        Strategy::CacheFirst
      };
    }

    Strategy::CacheFirst
  }
}

fn has_static_extension(path: &str) -> bool {
  let file = path.rsplit('/').next().unwrap_or(path);
  match file.rsplit_once('.') {
    Some((stem, ext)) if !stem.is_empty() => STATIC_EXTENSIONS
      .iter()
      .any(|known| ext.eq_ignore_ascii_case(known)),
    _ => false,
  }
}

fn is_document(request: &RequestDescriptor) -> bool {
  let path = request.path();
  path == "/" || path.ends_with(".html") || request.is_navigation()
}
