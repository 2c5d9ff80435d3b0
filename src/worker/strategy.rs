//! Caching strategies that answer intercepted requests.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::revalidate::Revalidations;
use crate::cache::{CacheRole, CacheStorage, CacheStore, NamedCache, RequestKey};
use crate::config::WorkerConfig;
use crate::net::{Network, Request, Response, ResponseType};

/// Strategy executors sharing one cache store and one network.
pub struct Strategies<S: CacheStorage, N: Network> {
  store: CacheStore<S>,
  network: Arc<N>,
  config: Arc<WorkerConfig>,
  revalidations: Revalidations,
}

impl<S: CacheStorage, N: Network> Strategies<S, N> {
  pub fn new(
    store: CacheStore<S>,
    network: Arc<N>,
    config: Arc<WorkerConfig>,
    revalidations: Revalidations,
  ) -> Self {
    Self {
      store,
      network,
      config,
      revalidations,
    }
  }

  /// Open the current cache for a role, if this version has one.
  fn cache(&self, role: CacheRole) -> Option<NamedCache<S>> {
    self.config.registry.name(role).map(|name| self.store.open(name))
  }

  /// Network-only with a minimal offline fallback.
  ///
  /// 1. Fetch from network; any status is returned as is
  /// 2. On network error, serve the offline cache entry
  /// 3. Otherwise answer 503 "Offline"
  pub async fn network_only(&self, request: &Request) -> Response {
    match self.network.fetch(request).await {
      Ok(response) => response,
      Err(e) => {
        debug!(url = %request.url, error = %e, "network failed, trying offline cache");

        if let Some(hit) = self
          .cache(CacheRole::Offline)
          .and_then(|cache| cache.match_request(request))
        {
          return hit;
        }

        info!(url = %request.url, "serving offline placeholder");
        Response::offline()
      }
    }
  }

  /// Cache-first for static assets.
  ///
  /// A hit never touches the network. A miss is fetched, and stored when
  /// the status is 200. Network errors propagate.
  pub async fn cache_first(&self, request: &Request) -> Result<Response> {
    let cache = self.cache(CacheRole::Assets);

    if let Some(hit) = cache.as_ref().and_then(|c| c.match_request(request)) {
      return Ok(hit);
    }

    let response = self.network.fetch(request).await?;
    if response.status == 200 {
      if let Some(cache) = &cache {
        cache.put(request, &response);
      }
    }

    Ok(response)
  }

  /// Network-first for navigations, with the stored app shell as fallback.
  ///
  /// 1. Fetch from network; on 200 store it as the shell and return it
  /// 2. On error or any other status, serve the stored shell
  /// 3. With no shell stored, fetch once more and return whatever comes back
  pub async fn network_first(&self, request: &Request) -> Result<Response> {
    let cache = self.cache(CacheRole::Assets);
    let shell_key = RequestKey::new("GET", &self.config.shell);

    match self.network.fetch(request).await {
      Ok(response) if response.status == 200 => {
        if let Some(cache) = &cache {
          cache.put_key(&shell_key, &response);
        }
        return Ok(response);
      }
      Ok(response) => {
        debug!(url = %request.url, status = response.status, "navigation not ok, falling back to shell");
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "navigation failed, falling back to shell");
      }
    }

    if let Some(entry) = cache.as_ref().and_then(|c| c.match_key(&shell_key)) {
      return Ok(entry.response);
    }

    debug!(url = %request.url, "no shell stored, retrying network");
    self.network.fetch(request).await
  }

  /// Stale-while-revalidate for third-party API and image hosts.
  ///
  /// A revalidation is always spawned. It stores responses with status 200
  /// or opaque ones. A cached entry is returned without waiting for it;
  /// otherwise the revalidation result is awaited. `None` means neither the
  /// cache nor the network had a representation.
  pub async fn stale_while_revalidate(&self, request: &Request) -> Option<Response> {
    let cache = self.cache(CacheRole::Api);
    let cached = cache.as_ref().and_then(|c| c.match_request(request));

    let network = Arc::clone(&self.network);
    let owned = request.clone();
    let handle = tokio::spawn(async move {
      match network.fetch(&owned).await {
        Ok(response) => {
          if response.status == 200 || response.response_type == ResponseType::Opaque {
            if let Some(cache) = &cache {
              cache.put(&owned, &response);
            }
          }
          Some(response)
        }
        Err(e) => {
          debug!(url = %owned.url, error = %e, "revalidation failed");
          None
        }
      }
    });

    match cached {
      Some(response) => {
        self.revalidations.track(handle);
        Some(response)
      }
      None => match handle.await {
        Ok(response) => response,
        Err(e) => {
          warn!(url = %request.url, error = %e, "revalidation task aborted");
          None
        }
      },
    }
  }
}

impl<S: CacheStorage, N: Network> Clone for Strategies<S, N> {
  fn clone(&self) -> Self {
    Self {
      store: self.store.clone(),
      network: Arc::clone(&self.network),
      config: Arc::clone(&self.config),
      revalidations: self.revalidations.clone(),
    }
  }
}
