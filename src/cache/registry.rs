//! Registry of the named caches the current worker version owns.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// What a named cache is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheRole {
  /// Precached static assets and the app shell
  Assets,
  /// Third-party API and image responses
  Api,
  /// Fallback entries for the network-only variant
  Offline,
}

impl CacheRole {
  pub fn suffix(&self) -> &'static str {
    match self {
      Self::Assets => "assets",
      Self::Api => "api",
      Self::Offline => "offline",
    }
  }
}

/// Mapping of cache role to the cache name of the current version.
///
/// Every existing cache whose name is not in this registry is stale.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheRegistry {
  names: BTreeMap<CacheRole, String>,
}

impl CacheRegistry {
  pub fn new(names: impl IntoIterator<Item = (CacheRole, String)>) -> Self {
    Self {
      names: names.into_iter().collect(),
    }
  }

  /// Default names for `roles`: `{version}-{suffix}`.
  pub fn for_version(version: &str, roles: &[CacheRole]) -> Self {
    Self::new(
      roles
        .iter()
        .map(|role| (*role, format!("{}-{}", version, role.suffix()))),
    )
  }

  /// Replace the name of a role already in the registry.
  pub fn rename(&mut self, role: CacheRole, name: String) {
    if let Some(current) = self.names.get_mut(&role) {
      *current = name;
    }
  }

  pub fn name(&self, role: CacheRole) -> Option<&str> {
    self.names.get(&role).map(String::as_str)
  }

  pub fn roles(&self) -> impl Iterator<Item = (CacheRole, &str)> {
    self.names.iter().map(|(role, name)| (*role, name.as_str()))
  }

  pub fn current(&self) -> BTreeSet<&str> {
    self.names.values().map(String::as_str).collect()
  }

  pub fn is_current(&self, name: &str) -> bool {
    self.names.values().any(|n| n == name)
  }

  /// Names in `existing` that do not belong to the current version, in order.
  pub fn stale<'a>(&self, existing: &'a [String]) -> Vec<&'a str> {
    let current = self.current();
    existing
      .iter()
      .map(String::as_str)
      .filter(|name| !current.contains(name))
      .collect()
  }
}
