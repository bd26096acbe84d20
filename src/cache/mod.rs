//! Persistent, versioned response stores.
//!
//! A store is a named mapping from request identity to response. The proxy
//! keeps exactly one current store, named by its version tag, and deletes the
//! others on activation.

mod storage;
mod traits;

pub use storage::SqliteStorage;
pub use traits::{CacheStorage, CachedEntry, CachedResponse, RequestKey};
