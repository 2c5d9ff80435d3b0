use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::{CacheRegistry, CacheRole};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the worker is registered for (e.g. "https://app.example")
  pub origin: String,
  /// Build version; changing it invalidates every cache of the previous build
  pub version: String,
  #[serde(default)]
  pub variant: Variant,
  /// Path of the app shell document, relative to the origin
  #[serde(default = "default_shell")]
  pub shell: String,
  /// Paths fetched and stored at install time
  #[serde(default)]
  pub precache: Vec<String>,
  /// File extensions served cache-first (case-insensitive, without dot)
  #[serde(
    default = "default_static_extensions",
    deserialize_with = "deserialize_extension_set"
  )]
  pub static_extensions: BTreeSet<String>,
  /// Hostname substrings that get stale-while-revalidate treatment
  #[serde(default)]
  pub api_hosts: Vec<String>,
  /// Cache name overrides per role (defaults to "{version}-{role}")
  #[serde(default)]
  pub caches: BTreeMap<CacheRole, String>,
  /// Activate right after a successful install
  #[serde(default = "default_true")]
  pub skip_waiting: bool,
  /// Fetch and store the shell document during activation
  #[serde(default)]
  pub prewarm_shell: bool,
  /// SQLite database path (default: $XDG_DATA_HOME/swcache/cache.db)
  pub database: Option<PathBuf>,
  /// Directory for daily rolling log files; logs go to stderr when unset
  pub log_dir: Option<PathBuf>,
  /// Per-request network timeout
  pub timeout_secs: Option<u64>,
}

/// Which generation of the worker's routing to run.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
  /// Network-only for every GET, with a minimal offline fallback
  Recovery,
  /// Cache-first static assets and network-first navigations
  Shell,
  /// Shell plus stale-while-revalidate for allow-listed third-party hosts
  #[default]
  Full,
}

impl Variant {
  /// Cache roles the variant uses.
  pub fn roles(&self) -> &'static [CacheRole] {
    match self {
      Self::Recovery => &[CacheRole::Offline],
      Self::Shell => &[CacheRole::Assets],
      Self::Full => &[CacheRole::Assets, CacheRole::Api],
    }
  }
}

fn default_shell() -> String {
  "/".to_string()
}

fn default_true() -> bool {
  true
}

fn default_static_extensions() -> BTreeSet<String> {
  [
    "js", "css", "png", "jpg", "jpeg", "svg", "webp", "ico", "woff", "woff2", "json",
  ]
  .into_iter()
  .map(String::from)
  .collect()
}

fn deserialize_extension_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(
    v.into_iter()
      .map(|s| s.trim_start_matches('.').to_lowercase())
      .collect(),
  )
}

/// Resolved worker settings, fixed for the lifetime of a worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
  pub origin: Url,
  pub version: String,
  pub variant: Variant,
  pub registry: CacheRegistry,
  pub shell: Url,
  pub precache: Vec<Url>,
  pub static_extensions: BTreeSet<String>,
  pub api_hosts: Vec<String>,
  pub skip_waiting: bool,
  pub prewarm_shell: bool,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./swcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/swcache/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/swcache/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("swcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("swcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    Ok(config)
  }

  pub fn timeout(&self) -> Option<Duration> {
    self.timeout_secs.map(Duration::from_secs)
  }

  /// Resolve URLs and cache names into the settings a worker runs with.
  pub fn worker_config(&self) -> Result<WorkerConfig> {
    let origin =
      Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))?;
    if origin.cannot_be_a_base() {
      return Err(eyre!("Origin {} cannot be used as a base URL", self.origin));
    }

    let resolve = |path: &str| {
      origin
        .join(path)
        .map_err(|e| eyre!("Invalid path {}: {}", path, e))
    };

    let shell = resolve(&self.shell)?;
    let precache = self
      .precache
      .iter()
      .map(|p| resolve(p))
      .collect::<Result<Vec<_>>>()?;

    let mut registry = CacheRegistry::for_version(&self.version, self.variant.roles());
    for (role, name) in &self.caches {
      registry.rename(*role, name.clone());
    }

    Ok(WorkerConfig {
      origin,
      version: self.version.clone(),
      variant: self.variant,
      registry,
      shell,
      precache,
      static_extensions: self.static_extensions.clone(),
      api_hosts: self.api_hosts.iter().map(|h| h.to_lowercase()).collect(),
      skip_waiting: self.skip_waiting,
      prewarm_shell: self.prewarm_shell,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const FULL: &str = r#"
origin: https://app.example
version: v2
variant: full
shell: /index.html
precache:
  - /icons/icon-192.png
  - icons/icon-512.png
static_extensions: [".JS", "css", "png"]
api_hosts: ["api.themoviedb.org", "image.tmdb.org"]
caches:
  api: v2-tmdb
"#;

  #[test]
  fn test_parse_full_config() {
    let config = Config::parse(FULL).unwrap();
    assert_eq!(config.variant, Variant::Full);
    assert!(config.skip_waiting);
    assert!(!config.prewarm_shell);
    assert_eq!(
      config.static_extensions,
      ["css", "js", "png"]
        .into_iter()
        .map(String::from)
        .collect::<BTreeSet<_>>()
    );

    let worker = config.worker_config().unwrap();
    assert_eq!(worker.shell.as_str(), "https://app.example/index.html");
    assert_eq!(
      worker
        .precache
        .iter()
        .map(Url::as_str)
        .collect::<Vec<_>>(),
      vec![
        "https://app.example/icons/icon-192.png",
        "https://app.example/icons/icon-512.png"
      ]
    );
    assert_eq!(worker.registry.name(CacheRole::Assets), Some("v2-assets"));
    assert_eq!(worker.registry.name(CacheRole::Api), Some("v2-tmdb"));
    assert_eq!(worker.registry.name(CacheRole::Offline), None);
  }

  #[test]
  fn test_defaults() {
    let config = Config::parse("origin: https://app.example\nversion: v1\n").unwrap();
    assert_eq!(config.variant, Variant::Full);
    assert_eq!(config.shell, "/");
    assert!(config.precache.is_empty());
    assert!(config.static_extensions.contains("woff2"));
    assert!(config.timeout().is_none());
  }

  #[test]
  fn test_recovery_uses_offline_cache_only() {
    let config = Config::parse(
      "origin: https://app.example\nversion: cs-sw-recover-1\nvariant: recovery\n\
       caches:\n  offline: cinesafari-offline-cs-sw-recover-1\n  assets: ignored\n",
    )
    .unwrap();

    let worker = config.worker_config().unwrap();
    assert_eq!(
      worker.registry.current().into_iter().collect::<Vec<_>>(),
      vec!["cinesafari-offline-cs-sw-recover-1"]
    );
  }

  #[test]
  fn test_invalid_origin() {
    let config = Config::parse("origin: not a url\nversion: v1\n").unwrap();
    assert!(config.worker_config().is_err());
  }
}
