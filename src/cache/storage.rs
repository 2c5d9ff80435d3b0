//! Cache storage trait with in-memory and SQLite implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::key::RequestKey;
use crate::net::{Response, ResponseType};

/// A response stored in a named cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
  /// URL of the request the entry was stored for
  pub url: String,
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// A backend holds any number of named caches, each mapping a request key
/// to at most one entry.
pub trait CacheStorage: Send + Sync + 'static {
  /// Create the named cache if it does not exist yet.
  fn open(&self, name: &str) -> Result<()>;

  /// Names of all existing caches, oldest first.
  fn keys(&self) -> Result<Vec<String>>;

  /// Delete a named cache and all its entries. Returns whether it existed.
  fn delete(&self, name: &str) -> Result<bool>;

  /// Get the entry stored for `key` in the named cache.
  fn get(&self, name: &str, key: &RequestKey) -> Result<Option<CachedEntry>>;

  /// Store `response` for `key`, replacing any previous entry.
  fn put(&self, name: &str, key: &RequestKey, response: &Response) -> Result<()>;
}

/// Storage that keeps everything in process memory.
///
/// Used for `--ephemeral` runs; contents are lost on exit.
#[derive(Default)]
pub struct MemoryStorage {
  caches: Mutex<Vec<(String, HashMap<String, CachedEntry>)>>,
  writes: AtomicUsize,
  fail_writes: AtomicBool,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of successful `put` calls so far.
  #[cfg(test)]
  pub fn write_count(&self) -> usize {
    self.writes.load(Ordering::SeqCst)
  }

  /// Make every subsequent `put` fail, as with an exhausted quota.
  #[cfg(test)]
  pub fn fail_writes(&self) {
    self.fail_writes.store(true, Ordering::SeqCst);
  }
}

impl CacheStorage for MemoryStorage {
  fn open(&self, name: &str) -> Result<()> {
    let mut caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    if !caches.iter().any(|(n, _)| n == name) {
      caches.push((name.to_string(), HashMap::new()));
    }
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(caches.iter().map(|(n, _)| n.clone()).collect())
  }

  fn delete(&self, name: &str) -> Result<bool> {
    let mut caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let before = caches.len();
    caches.retain(|(n, _)| n != name);
    Ok(caches.len() != before)
  }

  fn get(&self, name: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    let caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      caches
        .iter()
        .find(|(n, _)| n == name)
        .and_then(|(_, entries)| entries.get(key.hash()))
        .cloned(),
    )
  }

  fn put(&self, name: &str, key: &RequestKey, response: &Response) -> Result<()> {
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(eyre!("Failed to store entry in {}: quota exceeded", name));
    }

    let mut caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let entry = CachedEntry {
      url: key.url().to_string(),
      response: response.clone(),
      cached_at: Utc::now(),
    };

    match caches.iter_mut().find(|(n, _)| n == name) {
      Some((_, entries)) => {
        entries.insert(key.hash().to_string(), entry);
      }
      None => {
        let mut entries = HashMap::new();
        entries.insert(key.hash().to_string(), entry);
        caches.push((name.to_string(), entries));
      }
    }

    self.writes.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}

/// Response metadata stored next to the body blob.
#[derive(Debug, Serialize, Deserialize)]
struct ResponseHead {
  status: u16,
  headers: Vec<(String, String)>,
  response_type: ResponseType,
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the cache database at `path`, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory database.
  #[cfg(test)]
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("swcache").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Named caches, in creation order
CREATE TABLE IF NOT EXISTS caches (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One entry per request key per cache
CREATE TABLE IF NOT EXISTS entries (
    cache_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    head TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, request_key)
);
"#;

impl CacheStorage for SqliteStorage {
  fn open(&self, name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("INSERT OR IGNORE INTO caches (name) VALUES (?)", params![name])
      .map_err(|e| eyre!("Failed to create cache {}: {}", name, e))?;

    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM caches ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, name: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let result = conn
      .execute("DELETE FROM entries WHERE cache_name = ?", params![name])
      .and_then(|_| conn.execute("DELETE FROM caches WHERE name = ?", params![name]));

    match result {
      Ok(removed) => {
        conn
          .execute("COMMIT", [])
          .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
        Ok(removed > 0)
      }
      Err(e) => {
        let _ = conn.execute("ROLLBACK", []);
        Err(eyre!("Failed to delete cache {}: {}", name, e))
      }
    }
  }

  fn get(&self, name: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT url, head, body, cached_at FROM entries
         WHERE cache_name = ? AND request_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(String, String, Vec<u8>, String)> = stmt
      .query_row(params![name, key.hash()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .optional()
      .map_err(|e| eyre!("Failed to read entry {}: {}", key.url(), e))?;

    match row {
      Some((url, head, body, cached_at_str)) => {
        let head: ResponseHead = serde_json::from_str(&head)
          .map_err(|e| eyre!("Failed to deserialize entry {}: {}", url, e))?;
        let cached_at = parse_datetime(&cached_at_str)?;
        Ok(Some(CachedEntry {
          url,
          response: Response {
            status: head.status,
            headers: head.headers,
            body,
            response_type: head.response_type,
          },
          cached_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, name: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let head = serde_json::to_string(&ResponseHead {
      status: response.status,
      headers: response.headers.clone(),
      response_type: response.response_type,
    })
    .map_err(|e| eyre!("Failed to serialize entry: {}", e))?;

    conn
      .execute("INSERT OR IGNORE INTO caches (name) VALUES (?)", params![name])
      .map_err(|e| eyre!("Failed to create cache {}: {}", name, e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO entries (cache_name, request_key, url, head, body, cached_at)
         VALUES (?, ?, ?, ?, ?, datetime('now'))",
        params![name, key.hash(), key.url(), head, response.body],
      )
      .map_err(|e| eyre!("Failed to store entry {}: {}", key.url(), e))?;

    Ok(())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn key(path: &str) -> RequestKey {
    RequestKey::new("GET", &Url::parse("https://app.example/").unwrap().join(path).unwrap())
  }

  fn backends() -> Vec<Box<dyn CacheStorage>> {
    vec![
      Box::new(MemoryStorage::new()),
      Box::new(SqliteStorage::in_memory().unwrap()),
    ]
  }

  #[test]
  fn test_put_replaces_previous_entry() {
    for storage in backends() {
      storage.put("v1-assets", &key("app.js"), &Response::new(200, "old")).unwrap();
      storage.put("v1-assets", &key("app.js"), &Response::new(200, "new")).unwrap();

      let entry = storage.get("v1-assets", &key("app.js")).unwrap().unwrap();
      assert_eq!(entry.response.text(), "new");
      assert_eq!(entry.url, "https://app.example/app.js");
    }
  }

  #[test]
  fn test_caches_are_isolated() {
    for storage in backends() {
      storage.put("a", &key("x.png"), &Response::new(200, "a")).unwrap();
      assert!(storage.get("b", &key("x.png")).unwrap().is_none());
      assert!(storage.get("a", &key("y.png")).unwrap().is_none());
    }
  }

  #[test]
  fn test_keys_and_delete() {
    for storage in backends() {
      storage.open("v1").unwrap();
      storage.open("v2-assets").unwrap();
      storage.open("v1").unwrap();
      storage.put("v1", &key("a.css"), &Response::new(200, "a")).unwrap();

      assert_eq!(storage.keys().unwrap(), vec!["v1", "v2-assets"]);

      assert!(storage.delete("v1").unwrap());
      assert!(!storage.delete("v1").unwrap());
      assert_eq!(storage.keys().unwrap(), vec!["v2-assets"]);

      // Recreating the cache must not resurrect old entries
      storage.open("v1").unwrap();
      assert!(storage.get("v1", &key("a.css")).unwrap().is_none());
    }
  }

  #[test]
  fn test_sqlite_preserves_response_head() {
    let storage = SqliteStorage::in_memory().unwrap();
    let response = Response::new(200, vec![0u8, 159, 146, 150])
      .with_header("Content-Type", "image/png")
      .with_type(ResponseType::Opaque);

    storage.put("v2-api", &key("poster.png"), &response).unwrap();
    let entry = storage.get("v2-api", &key("poster.png")).unwrap().unwrap();

    assert_eq!(entry.response, response);
  }
}
