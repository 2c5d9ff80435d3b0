//! Request classification.

use std::fmt;
use std::sync::Arc;
use url::Url;

use crate::config::{Variant, WorkerConfig};
use crate::net::{is_same_origin, Request};

/// How an intercepted request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Not intercepted; the host's default network handling applies
  Passthrough,
  NetworkOnly,
  CacheFirst,
  NetworkFirst,
  StaleWhileRevalidate,
}

impl fmt::Display for Route {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Route::Passthrough => write!(f, "passthrough"),
      Route::NetworkOnly => write!(f, "network-only"),
      Route::CacheFirst => write!(f, "cache-first"),
      Route::NetworkFirst => write!(f, "network-first"),
      Route::StaleWhileRevalidate => write!(f, "stale-while-revalidate"),
    }
  }
}

/// Picks exactly one route per request.
#[derive(Clone)]
pub struct Router {
  config: Arc<WorkerConfig>,
}

impl Router {
  pub fn new(config: Arc<WorkerConfig>) -> Self {
    Self { config }
  }

  pub fn route(&self, request: &Request) -> Route {
    if !request.is_get() {
      return Route::Passthrough;
    }

    if self.config.variant == Variant::Recovery {
      return Route::NetworkOnly;
    }

    let same_origin = is_same_origin(&request.url, &self.config.origin);

    if request.is_navigation() {
      Route::NetworkFirst
    } else if same_origin && self.is_static_asset(&request.url) {
      Route::CacheFirst
    } else if !same_origin && self.config.variant == Variant::Full && self.is_api_host(&request.url)
    {
      Route::StaleWhileRevalidate
    } else {
      Route::Passthrough
    }
  }

  fn is_static_asset(&self, url: &Url) -> bool {
    let last = url
      .path_segments()
      .and_then(|mut segments| segments.next_back())
      .unwrap_or("");

    match last.rsplit_once('.') {
      Some((stem, ext)) if !stem.is_empty() => self
        .config
        .static_extensions
        .contains(&ext.to_ascii_lowercase()),
      _ => false,
    }
  }

  fn is_api_host(&self, url: &Url) -> bool {
    let host = match url.host_str() {
      Some(h) => h.to_ascii_lowercase(),
      None => return false,
    };
    self
      .config
      .api_hosts
      .iter()
      .any(|pattern| host.contains(pattern.as_str()))
  }
}
