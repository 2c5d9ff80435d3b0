use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::cache::CacheStorage;
use crate::net::{Network, Request};
use crate::worker::{FetchOutcome, Route, Worker};

/// Events delivered to the worker by its host
#[derive(Debug)]
pub enum WorkerEvent {
  Install {
    reply: oneshot::Sender<Result<()>>,
  },
  Activate {
    reply: oneshot::Sender<Result<Vec<String>>>,
  },
  Fetch {
    request: Request,
    reply: oneshot::Sender<Result<FetchOutcome>>,
  },
}

/// Delivers events to a worker running on its own task.
///
/// Lifecycle events are handled one at a time in arrival order. Each fetch
/// is routed on arrival and then answered on a task of its own, so slow
/// requests never hold up other events.
#[derive(Clone)]
pub struct EventDispatcher {
  tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl EventDispatcher {
  /// Start the event loop for `worker`.
  pub fn spawn<S: CacheStorage, N: Network>(worker: Arc<Worker<S, N>>) -> Self {
    let (tx, mut rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      while let Some(event) = rx.recv().await {
        match event {
          WorkerEvent::Install { reply } => {
            let _ = reply.send(worker.install().await);
          }
          WorkerEvent::Activate { reply } => {
            let _ = reply.send(worker.activate().await);
          }
          WorkerEvent::Fetch { request, reply } => {
            // Routing is synchronous so the decision to answer is made
            // before any other event is looked at
            let route = worker.intercept(&request);
            if route == Route::Passthrough {
              let _ = reply.send(Ok(FetchOutcome::Passthrough));
              continue;
            }

            let worker = Arc::clone(&worker);
            tokio::spawn(async move {
              let outcome = worker.respond(route, &request).await;
              if reply.send(outcome).is_err() {
                debug!(url = %request.url, "fetch requester went away");
              }
            });
          }
        }
      }
    });

    Self { tx }
  }

  fn send(&self, event: WorkerEvent) -> Result<()> {
    self
      .tx
      .send(event)
      .map_err(|_| eyre!("Worker event loop has stopped"))
  }

  pub async fn install(&self) -> Result<()> {
    let (reply, rx) = oneshot::channel();
    self.send(WorkerEvent::Install { reply })?;
    rx.await.map_err(|_| eyre!("Worker dropped install event"))?
  }

  pub async fn activate(&self) -> Result<Vec<String>> {
    let (reply, rx) = oneshot::channel();
    self.send(WorkerEvent::Activate { reply })?;
    rx.await.map_err(|_| eyre!("Worker dropped activate event"))?
  }

  pub async fn fetch(&self, request: Request) -> Result<FetchOutcome> {
    let (reply, rx) = oneshot::channel();
    self.send(WorkerEvent::Fetch { request, reply })?;
    rx.await.map_err(|_| eyre!("Worker dropped fetch event"))?
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use crate::config::Config;
  use crate::net::scripted::ScriptedNetwork;
  use crate::net::Response;
  use crate::worker::WorkerState;
  use url::Url;

  fn dispatcher() -> (
    EventDispatcher,
    Arc<Worker<MemoryStorage, ScriptedNetwork>>,
    Arc<ScriptedNetwork>,
  ) {
    let config = Config::parse(
      "origin: https://app.example\nversion: v3\nprecache: [/icon.png]\n\
       api_hosts: [tmdb.org]\n",
    )
    .unwrap()
    .worker_config()
    .unwrap();
    let network = Arc::new(ScriptedNetwork::new());
    let worker = Arc::new(Worker::new(
      config,
      MemoryStorage::new(),
      Arc::clone(&network),
    ));
    (EventDispatcher::spawn(Arc::clone(&worker)), worker, network)
  }

  #[tokio::test]
  async fn test_lifecycle_then_fetch() {
    let (events, worker, network) = dispatcher();
    network.respond("https://app.example/icon.png", Response::new(200, "png"));
    worker.store().open("v2-assets");

    let url = Url::parse("https://app.example/icon.png").unwrap();
    let before = events.fetch(Request::get(url.clone())).await.unwrap();
    assert_eq!(before, FetchOutcome::Passthrough);

    events.install().await.unwrap();
    assert_eq!(worker.state(), WorkerState::Activated);
    assert_eq!(worker.store().keys(), vec!["v3-assets"]);

    let outcome = events.fetch(Request::get(url)).await.unwrap();
    match outcome {
      FetchOutcome::Respond { route, response } => {
        assert_eq!(route, Route::CacheFirst);
        assert_eq!(response.text(), "png");
      }
      FetchOutcome::Passthrough => panic!("expected a response"),
    }
    assert_eq!(network.calls_to("https://app.example/icon.png"), 1);
  }

  #[tokio::test]
  async fn test_slow_fetch_does_not_block_others() {
    let (events, worker, network) = dispatcher();
    network.respond("https://app.example/icon.png", Response::new(200, "png"));
    events.install().await.unwrap();
    assert_eq!(worker.state(), WorkerState::Activated);

    let slow = "https://api.tmdb.org/3/movie/7";
    network.respond(slow, Response::new(200, "movie"));
    network.hold();
    let pending = {
      let events = events.clone();
      let url = Url::parse(slow).unwrap();
      tokio::spawn(async move { events.fetch(Request::get(url)).await })
    };
    while network.calls_to(slow) == 0 {
      tokio::task::yield_now().await;
    }

    let post = Request::get(Url::parse("https://app.example/login").unwrap()).with_method("POST");
    assert_eq!(events.fetch(post).await.unwrap(), FetchOutcome::Passthrough);

    network.release();
    let outcome = pending.await.unwrap().unwrap();
    assert!(matches!(outcome, FetchOutcome::Respond { .. }));
  }
}
