//! Request and response types exchanged between the worker, the cache and the network.

use serde::{Deserialize, Serialize};
use url::Url;

/// How a request was issued by the page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
  /// Top-level document navigation
  Navigate,
  SameOrigin,
  /// Cross-origin request without CORS; the response is opaque to the page
  #[default]
  NoCors,
  Cors,
}

/// An intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub mode: RequestMode,
}

impl Request {
  /// A plain GET subresource request.
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      mode: RequestMode::NoCors,
    }
  }

  /// A GET navigation request for a document.
  pub fn navigate(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      mode: RequestMode::Navigate,
    }
  }

  pub fn with_method(mut self, method: &str) -> Self {
    self.method = method.to_ascii_uppercase();
    self
  }

  pub fn with_mode(mut self, mode: RequestMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }
}

/// Visibility class of a response, as seen by the page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
  /// Same-origin response
  #[default]
  Basic,
  /// Cross-origin response readable through CORS
  Cors,
  /// Cross-origin response fetched without CORS
  Opaque,
}

/// A response blob, either fresh from the network or replayed from a cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub response_type: ResponseType,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
      response_type: ResponseType::Basic,
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn with_type(mut self, response_type: ResponseType) -> Self {
    self.response_type = response_type;
    self
  }

  /// Placeholder answered when neither the network nor the offline cache can help.
  pub fn offline() -> Self {
    Self::new(503, "Offline").with_header("Content-Type", "text/plain; charset=utf-8")
  }

  /// Whether the status is in the 2xx range.
  pub fn is_ok(&self) -> bool {
    (200..=299).contains(&self.status)
  }

  /// Look up a header value (case-insensitive name match).
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// Whether two URLs share scheme, host and port.
pub fn is_same_origin(a: &Url, b: &Url) -> bool {
  a.origin() == b.origin()
}
