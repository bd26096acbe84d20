//! Core traits and types for the cache store.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use sha2::{Digest, Sha256};

use crate::http::{Request, Response};

/// Identity of a request inside a store: method plus absolute URL with the
/// fragment removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  pub method: String,
  pub url: String,
}

impl RequestKey {
  pub fn from_request(request: &Request) -> Self {
    let mut url = request.url.clone();
    url.set_fragment(None);
    Self {
      method: request.method.as_str().to_ascii_uppercase(),
      url: url.into(),
    }
  }

  /// Stable, fixed-length hash used as the primary key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A response read back from a store.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Summary of one stored entry, for listings.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub method: String,
  pub url: String,
  pub status: u16,
  pub size: usize,
  pub cached_at: DateTime<Utc>,
}

/// Named, versioned response stores.
///
/// Each `put` fully replaces the previous entry for its key; there is no
/// partial write.
pub trait CacheStorage: Send + Sync + 'static {
  /// Open a store, creating it if absent.
  fn open(&self, store: &str) -> Result<()>;

  /// Whether a store with this name exists.
  fn has(&self, store: &str) -> Result<bool>;

  /// All store names, oldest first.
  fn keys(&self) -> Result<Vec<String>>;

  /// Delete a store and all its entries. Returns false if it did not exist.
  fn delete(&self, store: &str) -> Result<bool>;

  /// Look up the response stored for a request.
  fn match_request(&self, store: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Insert or replace the response for a request, creating the store if needed.
  fn put(&self, store: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// List entries in a store, ordered by URL.
  fn entries(&self, store: &str) -> Result<Vec<CachedEntry>>;
}
