//! Request identity used as the cache key.

use sha2::{Digest, Sha256};
use url::Url;

use crate::net::Request;

/// Identity of a request inside a named cache: method plus URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  hash: String,
  url: String,
}

impl RequestKey {
  pub fn new(method: &str, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    let url = url.to_string();

    let input = format!("{} {}", method.to_ascii_uppercase(), url);

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Self { hash, url }
  }

  pub fn for_request(request: &Request) -> Self {
    Self::new(&request.method, &request.url)
  }

  pub fn hash(&self) -> &str {
    &self.hash
  }

  /// The normalized URL, kept for display.
  pub fn url(&self) -> &str {
    &self.url
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_fragment_is_ignored() {
    let a = RequestKey::new("GET", &url("https://app.example/app.js#v=1"));
    let b = RequestKey::new("GET", &url("https://app.example/app.js"));
    assert_eq!(a, b);
    assert_eq!(a.url(), "https://app.example/app.js");
  }

  #[test]
  fn test_method_is_part_of_identity() {
    let get = RequestKey::new("get", &url("https://app.example/app.js"));
    let head = RequestKey::new("HEAD", &url("https://app.example/app.js"));
    assert_eq!(get, RequestKey::new("GET", &url("https://app.example/app.js")));
    assert_ne!(get, head);
  }

  #[test]
  fn test_query_is_part_of_identity() {
    let a = RequestKey::new("GET", &url("https://api.example/movie?id=1"));
    let b = RequestKey::new("GET", &url("https://api.example/movie?id=2"));
    assert_ne!(a.hash(), b.hash());
    assert_eq!(a.hash().len(), 64);
  }
}
