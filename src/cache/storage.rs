//! SQLite implementation of the cache store.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::traits::{CacheStorage, CachedEntry, CachedResponse, RequestKey};
use crate::http::{Response, ResponseType};

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)
          .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
      }
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
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

  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS cache_stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS cache_entries (
    store TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    response_type TEXT NOT NULL,
    redirected INTEGER NOT NULL DEFAULT 0,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (store, request_hash),
    FOREIGN KEY (store) REFERENCES cache_stores(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_url ON cache_entries(store, url);
"#;

impl CacheStorage for SqliteStorage {
  fn open(&self, store: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
        params![store],
      )
      .map_err(|e| eyre!("Failed to open store {}: {}", store, e))?;
    Ok(())
  }

  fn has(&self, store: &str) -> Result<bool> {
    let conn = self.lock()?;
    conn
      .query_row(
        "SELECT EXISTS(SELECT 1 FROM cache_stores WHERE name = ?)",
        params![store],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to look up store {}: {}", store, e))
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list stores: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read store name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, store: &str) -> Result<bool> {
    let conn = self.lock()?;
    let deleted = conn
      .execute("DELETE FROM cache_stores WHERE name = ?", params![store])
      .map_err(|e| eyre!("Failed to delete store {}: {}", store, e))?;
    Ok(deleted > 0)
  }

  fn match_request(&self, store: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;

    let row: Option<(u16, String, bool, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, response_type, redirected, headers, body, cached_at FROM cache_entries
         WHERE store = ? AND request_hash = ?",
        params![store, key.cache_hash()],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to match {} in {}: {}", key.url, store, e))?;

    let Some((status, response_type, redirected, headers, body, cached_at)) = row else {
      return Ok(None);
    };

    let response = Response {
      status: StatusCode::from_u16(status)
        .map_err(|e| eyre!("Invalid cached status {}: {}", status, e))?,
      headers: decode_headers(&headers)?,
      body: Bytes::from(body),
      response_type: ResponseType::parse(&response_type)
        .ok_or_else(|| eyre!("Invalid cached response type '{}'", response_type))?,
      redirected,
    };

    Ok(Some(CachedResponse {
      response,
      cached_at: parse_datetime(&cached_at)?,
    }))
  }

  fn put(&self, store: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let conn = self.lock()?;
    let headers = encode_headers(&response.headers)?;

    conn
      .execute(
        "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
        params![store],
      )
      .map_err(|e| eyre!("Failed to open store {}: {}", store, e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries
           (store, request_hash, method, url, status, response_type, redirected, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          store,
          key.cache_hash(),
          key.method,
          key.url,
          response.status.as_u16(),
          response.response_type.as_str(),
          response.redirected,
          headers,
          &response.body[..],
        ],
      )
      .map_err(|e| eyre!("Failed to store {}: {}", key.url, e))?;

    Ok(())
  }

  fn entries(&self, store: &str) -> Result<Vec<CachedEntry>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT method, url, status, length(body), cached_at FROM cache_entries
         WHERE store = ? ORDER BY url, method",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params![store], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, u16>(2)?,
          row.get::<_, i64>(3)?,
          row.get::<_, String>(4)?,
        ))
      })
      .map_err(|e| eyre!("Failed to list entries of {}: {}", store, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read entry: {}", e))?;

    rows
      .into_iter()
      .map(|(method, url, status, size, cached_at)| {
        Ok(CachedEntry {
          method,
          url,
          status,
          size: usize::try_from(size).unwrap_or_default(),
          cached_at: parse_datetime(&cached_at)?,
        })
      })
      .collect()
  }
}

/// Headers are kept as a JSON list of (name, raw value bytes) pairs so values
/// that are not visible ASCII survive the round-trip.
fn encode_headers(headers: &HeaderMap) -> Result<String> {
  let pairs: Vec<(&str, &[u8])> = headers
    .iter()
    .map(|(name, value)| (name.as_str(), value.as_bytes()))
    .collect();
  serde_json::to_string(&pairs).map_err(|e| eyre!("Failed to serialize headers: {}", e))
}

fn decode_headers(json: &str) -> Result<HeaderMap> {
  let pairs: Vec<(String, Vec<u8>)> =
    serde_json::from_str(json).map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;

  let mut headers = HeaderMap::new();
  for (name, value) in pairs {
    let name = HeaderName::from_bytes(name.as_bytes())
      .map_err(|e| eyre!("Invalid cached header name '{}': {}", name, e))?;
    let value = HeaderValue::from_bytes(&value)
      .map_err(|e| eyre!("Invalid cached value for header {}: {}", name, e))?;
    headers.append(name, value);
  }
  Ok(headers)
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
  use crate::http::Request;
  use reqwest::header;
  use url::Url;

  fn key(path: &str) -> RequestKey {
    let url = Url::parse("https://s.example/").unwrap().join(path).unwrap();
    RequestKey::from_request(&Request::get(url))
  }

  fn response(body: &'static [u8]) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, "text/html".parse().unwrap());
    Response {
      status: StatusCode::OK,
      headers,
      body: Bytes::from_static(body),
      response_type: ResponseType::Basic,
      redirected: false,
    }
  }

  #[test]
  fn test_put_and_match() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("v1", &key("/index.html"), &response(b"<html>")).unwrap();

    let cached = storage.match_request("v1", &key("/index.html")).unwrap().unwrap();
    assert_eq!(cached.response.status, StatusCode::OK);
    assert_eq!(&cached.response.body[..], b"<html>");
    assert_eq!(cached.response.response_type, ResponseType::Basic);
    assert_eq!(
      cached.response.headers.get(header::CONTENT_TYPE).unwrap(),
      "text/html"
    );
  }

  #[test]
  fn test_non_ascii_header_values_survive() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let mut stored = response(b"data");
    stored.headers.insert(
      header::CONTENT_DISPOSITION,
      HeaderValue::from_bytes(b"inline; filename=\"caf\xe9.txt\"").unwrap(),
    );
    stored
      .headers
      .append(header::SET_COOKIE, "a=1".parse().unwrap());
    stored
      .headers
      .append(header::SET_COOKIE, "b=2".parse().unwrap());
    storage.put("v1", &key("/file.txt"), &stored).unwrap();

    let cached = storage.match_request("v1", &key("/file.txt")).unwrap().unwrap();
    assert_eq!(cached.response.headers.len(), stored.headers.len());
    assert_eq!(
      cached
        .response
        .headers
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .as_bytes(),
      b"inline; filename=\"caf\xe9.txt\""
    );
    let cookies: Vec<_> = cached
      .response
      .headers
      .get_all(header::SET_COOKIE)
      .iter()
      .collect();
    assert_eq!(cookies, vec!["a=1", "b=2"]);
  }

  #[test]
  fn test_match_is_scoped_to_store() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("v1", &key("/index.html"), &response(b"old")).unwrap();
    assert!(storage.match_request("v2", &key("/index.html")).unwrap().is_none());
    assert!(storage.match_request("v1", &key("/other.html")).unwrap().is_none());
  }

  #[test]
  fn test_put_replaces_entry() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("v1", &key("/app.js"), &response(b"one")).unwrap();
    storage.put("v1", &key("/app.js"), &response(b"two")).unwrap();

    let cached = storage.match_request("v1", &key("/app.js")).unwrap().unwrap();
    assert_eq!(&cached.response.body[..], b"two");
    assert_eq!(storage.entries("v1").unwrap().len(), 1);
  }

  #[test]
  fn test_keys_and_delete_cascade() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open("portfolio-v1").unwrap();
    storage.put("portfolio-v2", &key("/"), &response(b"shell")).unwrap();
    storage.put("portfolio-v1", &key("/"), &response(b"old shell")).unwrap();

    assert_eq!(storage.keys().unwrap(), vec!["portfolio-v1", "portfolio-v2"]);

    assert!(storage.delete("portfolio-v1").unwrap());
    assert!(!storage.delete("portfolio-v1").unwrap());
    assert_eq!(storage.keys().unwrap(), vec!["portfolio-v2"]);
    assert!(storage.entries("portfolio-v1").unwrap().is_empty());
    assert!(storage.match_request("portfolio-v1", &key("/")).unwrap().is_none());
  }

  #[test]
  fn test_open_is_idempotent() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    assert!(!storage.has("v1").unwrap());
    storage.open("v1").unwrap();
    storage.open("v1").unwrap();
    assert!(storage.has("v1").unwrap());
    assert_eq!(storage.keys().unwrap().len(), 1);
  }

  #[test]
  fn test_entries_listing() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("v1", &key("/b.css"), &response(b"bb")).unwrap();
    storage.put("v1", &key("/a.css"), &response(b"a")).unwrap();

    let entries = storage.entries("v1").unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].url, "https://s.example/a.css");
    assert_eq!(entries[0].size, 1);
    assert_eq!(entries[1].size, 2);
    assert_eq!(entries[1].method, "GET");
  }

  #[test]
  fn test_file_backed_store_persists() {
    let dir = std::env::temp_dir().join(format!("swcache-test-{}", std::process::id()));
    let path = dir.join("cache.db");
    {
      let storage = SqliteStorage::open(&path).unwrap();
      storage.put("v1", &key("/index.html"), &response(b"persisted")).unwrap();
    }
    let storage = SqliteStorage::open(&path).unwrap();
    let cached = storage.match_request("v1", &key("/index.html")).unwrap().unwrap();
    assert_eq!(&cached.response.body[..], b"persisted");
    drop(storage);
    let _ = std::fs::remove_dir_all(&dir);
  }
}
