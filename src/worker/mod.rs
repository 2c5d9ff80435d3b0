//! The caching worker: lifecycle, request routing and strategies.

mod lifecycle;
mod revalidate;
mod router;
mod strategy;

use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::cache::{CacheStorage, CacheStore};
use crate::config::WorkerConfig;
use crate::net::{Network, Request, Response};

pub use lifecycle::WorkerState;
pub use router::Route;

use revalidate::Revalidations;
use router::Router;
use strategy::Strategies;

/// How the worker dealt with a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
  /// The worker answered the request
  Respond { route: Route, response: Response },
  /// The worker declined; the host should use its default network path
  Passthrough,
}

/// An offline caching worker for one origin and one version.
pub struct Worker<S: CacheStorage, N: Network> {
  config: Arc<WorkerConfig>,
  store: CacheStore<S>,
  network: Arc<N>,
  router: Router,
  strategies: Strategies<S, N>,
  revalidations: Revalidations,
  state: Mutex<WorkerState>,
  controls_clients: AtomicBool,
}

impl<S: CacheStorage, N: Network> Worker<S, N> {
  /// Create a worker that still has to be installed.
  pub fn new(config: WorkerConfig, storage: S, network: Arc<N>) -> Self {
    let config = Arc::new(config);
    let store = CacheStore::new(storage);
    let revalidations = Revalidations::default();
    let strategies = Strategies::new(
      store.clone(),
      Arc::clone(&network),
      Arc::clone(&config),
      revalidations.clone(),
    );

    Self {
      router: Router::new(Arc::clone(&config)),
      config,
      store,
      network,
      strategies,
      revalidations,
      state: Mutex::new(WorkerState::Parsed),
      controls_clients: AtomicBool::new(false),
    }
  }

  /// Create a worker that was activated in an earlier run and is being
  /// started again by its host.
  pub fn resumed(config: WorkerConfig, storage: S, network: Arc<N>) -> Self {
    let worker = Self::new(config, storage, network);
    *worker.state.lock().unwrap_or_else(PoisonError::into_inner) = WorkerState::Activated;
    worker.controls_clients.store(true, Ordering::SeqCst);
    worker
  }

  pub fn config(&self) -> &WorkerConfig {
    &self.config
  }

  pub fn store(&self) -> &CacheStore<S> {
    &self.store
  }

  pub fn state(&self) -> WorkerState {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn controls_clients(&self) -> bool {
    self.controls_clients.load(Ordering::SeqCst)
  }

  /// Decide synchronously whether and how the worker answers a request.
  pub fn intercept(&self, request: &Request) -> Route {
    if !self.state().can_intercept_fetch() {
      return Route::Passthrough;
    }
    self.router.route(request)
  }

  /// Produce the answer for a request already routed by `intercept`.
  pub async fn respond(&self, route: Route, request: &Request) -> Result<FetchOutcome> {
    debug!(method = %request.method, url = %request.url, %route, "fetch");

    let response = match route {
      Route::Passthrough => return Ok(FetchOutcome::Passthrough),
      Route::NetworkOnly => self.strategies.network_only(request).await,
      Route::CacheFirst => self.strategies.cache_first(request).await?,
      Route::NetworkFirst => self.strategies.network_first(request).await?,
      Route::StaleWhileRevalidate => self
        .strategies
        .stale_while_revalidate(request)
        .await
        .ok_or_else(|| eyre!("No representation available for {}", request.url))?,
    };

    Ok(FetchOutcome::Respond { route, response })
  }

  pub async fn handle_fetch(&self, request: &Request) -> Result<FetchOutcome> {
    let route = self.intercept(request);
    self.respond(route, request).await
  }

  /// Wait for background revalidations to finish.
  pub async fn settle(&self) -> usize {
    self.revalidations.settle().await
  }

  /// Fetch a request the worker declined, the way the host would.
  pub async fn fetch_direct(&self, request: &Request) -> Result<Response> {
    self.network.fetch(request).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use crate::config::Config;
  use crate::net::scripted::ScriptedNetwork;
  use url::Url;

  fn worker(variant: &str) -> (Worker<MemoryStorage, ScriptedNetwork>, Arc<ScriptedNetwork>) {
    let yaml = format!(
      "origin: https://app.example\nversion: v2\nvariant: {}\napi_hosts: [themoviedb.org]\n",
      variant
    );
    let config = Config::parse(&yaml).unwrap().worker_config().unwrap();
    let network = Arc::new(ScriptedNetwork::new());
    (
      Worker::resumed(config, MemoryStorage::new(), Arc::clone(&network)),
      network,
    )
  }

  fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  #[tokio::test]
  async fn test_post_is_never_intercepted() {
    let (worker, network) = worker("full");
    let post = get("https://app.example/app.js").with_method("POST");

    let outcome = worker.handle_fetch(&post).await.unwrap();
    assert_eq!(outcome, FetchOutcome::Passthrough);
    assert_eq!(network.total_calls(), 0);
  }

  #[tokio::test]
  async fn test_inactive_worker_passes_through() {
    let config = Config::parse("origin: https://app.example\nversion: v2\n")
      .unwrap()
      .worker_config()
      .unwrap();
    let network = Arc::new(ScriptedNetwork::new());
    let worker = Worker::new(config, MemoryStorage::new(), Arc::clone(&network));

    let outcome = worker
      .handle_fetch(&get("https://app.example/app.js"))
      .await
      .unwrap();
    assert_eq!(outcome, FetchOutcome::Passthrough);
    assert_eq!(network.total_calls(), 0);
  }

  #[tokio::test]
  async fn test_static_asset_is_answered_from_cache() {
    let (worker, network) = worker("full");
    let url = "https://app.example/app.css";
    network.respond(url, Response::new(200, "body {}"));

    for _ in 0..2 {
      match worker.handle_fetch(&get(url)).await.unwrap() {
        FetchOutcome::Respond { route, response } => {
          assert_eq!(route, Route::CacheFirst);
          assert_eq!(response.text(), "body {}");
        }
        FetchOutcome::Passthrough => panic!("expected a response"),
      }
    }
    assert_eq!(network.calls_to(url), 1);
  }

  #[tokio::test]
  async fn test_missing_representation_is_an_error() {
    let (worker, _network) = worker("full");
    let result = worker
      .handle_fetch(&get("https://api.themoviedb.org/3/movie/1"))
      .await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_recovery_answers_offline() {
    let (worker, _network) = worker("recovery");
    let outcome = worker
      .handle_fetch(&Request::navigate(Url::parse("https://app.example/").unwrap()))
      .await
      .unwrap();
    assert_eq!(
      outcome,
      FetchOutcome::Respond {
        route: Route::NetworkOnly,
        response: Response::offline(),
      }
    );
  }
}
