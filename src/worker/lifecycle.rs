//! Install and activate steps of the worker lifecycle.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::PoisonError;
use tracing::{debug, info, warn};

use super::Worker;
use crate::cache::{CacheRole, CacheStorage};
use crate::net::{Network, Request, RequestMode};

/// Worker lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Created, install not run yet
  Parsed,
  Installing,
  /// Installed, waiting to activate
  Installed,
  Activating,
  /// Active and controlling clients
  Activated,
  /// Install failed; this version never takes control
  Redundant,
}

impl WorkerState {
  /// Check if this state allows fetch interception
  pub fn can_intercept_fetch(&self) -> bool {
    matches!(self, WorkerState::Activated)
  }
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      WorkerState::Parsed => write!(f, "parsed"),
      WorkerState::Installing => write!(f, "installing"),
      WorkerState::Installed => write!(f, "installed"),
      WorkerState::Activating => write!(f, "activating"),
      WorkerState::Activated => write!(f, "activated"),
      WorkerState::Redundant => write!(f, "redundant"),
    }
  }
}

impl<S: CacheStorage, N: Network> Worker<S, N> {
  fn transition(&self, from: &[WorkerState], to: WorkerState) -> Result<()> {
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    if !from.contains(&*state) {
      return Err(eyre!("Cannot move worker from {} to {}", *state, to));
    }
    *state = to;
    Ok(())
  }

  fn set_state(&self, to: WorkerState) {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner) = to;
  }

  /// Precache the asset manifest.
  ///
  /// Every asset is fetched before anything is written; one failed or
  /// non-ok fetch fails the install and leaves the worker redundant.
  /// Activates right away when `skip_waiting` is set.
  pub async fn install(&self) -> Result<()> {
    self.transition(&[WorkerState::Parsed], WorkerState::Installing)?;

    match self.precache().await {
      Ok(count) => {
        info!(version = %self.config.version, assets = count, "installed");
        self.set_state(WorkerState::Installed);
      }
      Err(e) => {
        warn!(version = %self.config.version, error = %e, "install failed");
        self.set_state(WorkerState::Redundant);
        return Err(e);
      }
    }

    if self.config.skip_waiting {
      self.activate().await?;
    }

    Ok(())
  }

  async fn precache(&self) -> Result<usize> {
    if self.config.precache.is_empty() {
      return Ok(0);
    }

    let name = self.config.registry.name(CacheRole::Assets).ok_or_else(|| {
      eyre!(
        "Cannot precache: the {:?} variant has no assets cache",
        self.config.variant
      )
    })?;

    let requests: Vec<Request> = self
      .config
      .precache
      .iter()
      .map(|url| Request::get(url.clone()).with_mode(RequestMode::SameOrigin))
      .collect();

    let responses = try_join_all(requests.iter().map(|request| async move {
      let response = self.network.fetch(request).await?;
      if !response.is_ok() {
        return Err(eyre!(
          "Failed to precache {}: status {}",
          request.url,
          response.status
        ));
      }
      Ok::<_, color_eyre::Report>(response)
    }))
    .await?;

    let cache = self.store.open(name);
    for (request, response) in requests.iter().zip(&responses) {
      cache
        .put_strict(request, response)
        .map_err(|e| eyre!("Failed to precache {}: {}", request.url, e))?;
    }
    debug!(cache = cache.name(), assets = responses.len(), "precached");

    Ok(responses.len())
  }

  /// Delete caches of other versions and take control of clients.
  ///
  /// Returns the names of the deleted caches.
  pub async fn activate(&self) -> Result<Vec<String>> {
    self.transition(
      &[WorkerState::Installed, WorkerState::Activated],
      WorkerState::Activating,
    )?;

    let existing = self.store.keys();
    let mut deleted = Vec::new();
    for name in self.config.registry.stale(&existing) {
      if self.store.delete(name) {
        info!(cache = name, "deleted stale cache");
        deleted.push(name.to_string());
      }
    }

    if self.config.prewarm_shell {
      self.prewarm_shell().await;
    }

    self.controls_clients.store(true, Ordering::SeqCst);
    self.set_state(WorkerState::Activated);
    info!(version = %self.config.version, deleted = deleted.len(), "activated");

    Ok(deleted)
  }

  async fn prewarm_shell(&self) {
    let Some(name) = self.config.registry.name(CacheRole::Assets) else {
      return;
    };

    let request = Request::get(self.config.shell.clone()).with_mode(RequestMode::SameOrigin);
    match self.network.fetch(&request).await {
      Ok(response) if response.status == 200 => self.store.open(name).put(&request, &response),
      Ok(response) => debug!(status = response.status, "shell prewarm skipped"),
      Err(e) => debug!(error = %e, "shell prewarm failed"),
    }
  }
}
