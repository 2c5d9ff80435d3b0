//! In-memory network with canned replies, for tests.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use super::client::Network;
use super::types::{Request, Response};

#[derive(Clone)]
enum Reply {
  Respond(Response),
  Fail,
}

/// Network whose replies are scripted per URL.
///
/// Unknown URLs fail like an unreachable host. Calls can be held until
/// the test releases them.
#[derive(Default)]
pub struct ScriptedNetwork {
  replies: Mutex<HashMap<String, Reply>>,
  calls: Mutex<Vec<String>>,
  gate: Mutex<Option<Arc<Notify>>>,
}

impl ScriptedNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &str, response: Response) {
    self
      .replies
      .lock()
      .unwrap()
      .insert(url.to_string(), Reply::Respond(response));
  }

  pub fn fail(&self, url: &str) {
    self
      .replies
      .lock()
      .unwrap()
      .insert(url.to_string(), Reply::Fail);
  }

  /// Hold every subsequent fetch until `release` is called.
  pub fn hold(&self) {
    *self.gate.lock().unwrap() = Some(Arc::new(Notify::new()));
  }

  pub fn release(&self) {
    if let Some(gate) = self.gate.lock().unwrap().take() {
      gate.notify_waiters();
      gate.notify_one();
    }
  }

  /// Number of fetches issued for a URL.
  pub fn calls_to(&self, url: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|u| u.as_str() == url)
      .count()
  }

  pub fn total_calls(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

impl Network for ScriptedNetwork {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response>> {
    Box::pin(async move {
      let url = request.url.to_string();
      self.calls.lock().unwrap().push(url.clone());

      let gate = self.gate.lock().unwrap().clone();
      if let Some(gate) = gate {
        gate.notified().await;
      }

      let reply = self.replies.lock().unwrap().get(&url).cloned();
      match reply {
        Some(Reply::Respond(response)) => Ok(response),
        Some(Reply::Fail) | None => Err(eyre!("Failed to fetch {}: connection refused", url)),
      }
    })
  }
}
