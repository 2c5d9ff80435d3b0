use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use std::time::Duration;
use url::Url;

use super::types::{is_same_origin, Request, RequestMode, Response, ResponseType};

/// The network as seen by the worker.
///
/// Futures are boxed and `Send` so strategies can hand a fetch to a
/// detached task.
pub trait Network: Send + Sync + 'static {
  /// Perform a single network round trip. `Err` means the request never
  /// produced a response (offline, DNS, connection reset); HTTP error
  /// statuses are returned as `Ok`.
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response>>;
}

/// HTTP network backed by reqwest.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
  origin: Url,
}

impl HttpNetwork {
  pub fn new(origin: Url, timeout: Option<Duration>) -> Result<Self> {
    let mut builder = reqwest::Client::builder().user_agent(concat!(
      env!("CARGO_PKG_NAME"),
      "/",
      env!("CARGO_PKG_VERSION")
    ));
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }

    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, origin })
  }

  fn response_type(&self, request: &Request) -> ResponseType {
    if is_same_origin(&request.url, &self.origin) {
      ResponseType::Basic
    } else if request.mode == RequestMode::NoCors {
      ResponseType::Opaque
    } else {
      ResponseType::Cors
    }
  }
}

impl Network for HttpNetwork {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response>> {
    Box::pin(async move {
      let method = reqwest::Method::from_bytes(request.method.as_bytes())
        .map_err(|e| eyre!("Invalid method {}: {}", request.method, e))?;

      let resp = self
        .client
        .request(method, request.url.clone())
        .send()
        .await
        .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

      let status = resp.status().as_u16();
      let headers = resp
        .headers()
        .iter()
        .filter_map(|(name, value)| {
          value
            .to_str()
            .ok()
            .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

      let body = resp
        .bytes()
        .await
        .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?
        .to_vec();

      let mut response = Response::new(status, body).with_type(self.response_type(request));
      response.headers = headers;
      Ok(response)
    })
  }
}
