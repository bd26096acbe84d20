//! Offline-first HTTP cache proxy.
//!
//! Requests are classified against a static route table and served either
//! network-first (code and data that must track the latest deployment) or
//! cache-first (the page shell and static assets that must work offline),
//! backed by a versioned SQLite store.

pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod proxy;

pub use cache::{CacheStorage, SqliteStorage};
pub use config::Config;
pub use error::ProxyError;
pub use http::{HttpNetwork, Network, Request, Response};
pub use proxy::{FetchResult, OfflineProxy, Policy, ResponseSource};
