//! Best-effort accessor over a cache storage backend.
//!
//! Reads that fail are treated as misses and writes that fail are dropped;
//! both are logged. Only `put_strict` reports failures.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, warn};

use super::key::RequestKey;
use super::storage::{CacheStorage, CachedEntry};
use crate::net::{Request, Response};

/// Entry point to the named caches of a storage backend.
pub struct CacheStore<S: CacheStorage> {
  storage: Arc<S>,
}

impl<S: CacheStorage> CacheStore<S> {
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
    }
  }

  /// Open a named cache, creating it if needed.
  ///
  /// A handle is returned even when creation fails; operations on it are
  /// then swallowed like any other storage failure.
  pub fn open(&self, name: &str) -> NamedCache<S> {
    if let Err(e) = self.storage.open(name) {
      warn!(cache = name, error = %e, "failed to open cache");
    }
    NamedCache {
      name: name.to_string(),
      storage: Arc::clone(&self.storage),
    }
  }

  /// Names of existing caches; empty when the backend cannot list them.
  pub fn keys(&self) -> Vec<String> {
    self.storage.keys().unwrap_or_else(|e| {
      warn!(error = %e, "failed to list caches");
      Vec::new()
    })
  }

  /// Delete a named cache. Returns whether anything was deleted.
  pub fn delete(&self, name: &str) -> bool {
    match self.storage.delete(name) {
      Ok(deleted) => deleted,
      Err(e) => {
        warn!(cache = name, error = %e, "failed to delete cache");
        false
      }
    }
  }

  #[cfg(test)]
  pub fn storage(&self) -> &S {
    &self.storage
  }
}

impl<S: CacheStorage> Clone for CacheStore<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
    }
  }
}

/// Handle to one named cache.
pub struct NamedCache<S: CacheStorage> {
  name: String,
  storage: Arc<S>,
}

impl<S: CacheStorage> NamedCache<S> {
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Look up the response stored for a request.
  pub fn match_request(&self, request: &Request) -> Option<Response> {
    self
      .match_key(&RequestKey::for_request(request))
      .map(|entry| entry.response)
  }

  pub fn match_key(&self, key: &RequestKey) -> Option<CachedEntry> {
    match self.storage.get(&self.name, key) {
      Ok(Some(entry)) => {
        debug!(cache = %self.name, url = key.url(), "cache hit");
        Some(entry)
      }
      Ok(None) => {
        debug!(cache = %self.name, url = key.url(), "cache miss");
        None
      }
      Err(e) => {
        warn!(cache = %self.name, url = key.url(), error = %e, "cache read failed");
        None
      }
    }
  }

  /// Store a response for a request; failures are logged and dropped.
  pub fn put(&self, request: &Request, response: &Response) {
    self.put_key(&RequestKey::for_request(request), response);
  }

  pub fn put_key(&self, key: &RequestKey, response: &Response) {
    if let Err(e) = self.storage.put(&self.name, key, response) {
      warn!(cache = %self.name, url = key.url(), error = %e, "cache write failed");
    }
  }

  /// Store a response for a request and report failures.
  pub fn put_strict(&self, request: &Request, response: &Response) -> Result<()> {
    self
      .storage
      .put(&self.name, &RequestKey::for_request(request), response)
  }
}

impl<S: CacheStorage> Clone for NamedCache<S> {
  fn clone(&self) -> Self {
    Self {
      name: self.name.clone(),
      storage: Arc::clone(&self.storage),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use url::Url;

  fn request(path: &str) -> Request {
    Request::get(Url::parse("https://app.example/").unwrap().join(path).unwrap())
  }

  #[test]
  fn test_write_failures_are_swallowed() {
    let store = CacheStore::new(MemoryStorage::new());
    store.storage().fail_writes();

    let cache = store.open("v1-assets");
    cache.put(&request("app.js"), &Response::new(200, "js"));

    assert!(cache.match_request(&request("app.js")).is_none());
    assert!(cache
      .put_strict(&request("app.js"), &Response::new(200, "js"))
      .is_err());
  }

  #[test]
  fn test_open_creates_cache() {
    let store = CacheStore::new(MemoryStorage::new());
    let cache = store.open("v1-assets");
    assert_eq!(cache.name(), "v1-assets");
    assert_eq!(store.keys(), vec!["v1-assets"]);
    assert!(store.delete("v1-assets"));
    assert!(store.keys().is_empty());
  }
}
