//! Offline cache proxy.
//!
//! Sits between a site's pages and the network and owns the current versioned
//! store. The lifecycle has three entry points:
//!
//! - [`OfflineProxy::on_install`] opens the store and populates it from the
//!   route table, best-effort.
//! - [`OfflineProxy::on_activate`] deletes every store but the current one and
//!   starts intercepting requests.
//! - [`OfflineProxy::on_fetch`] serves one request network-first or
//!   cache-first depending on its URL.

mod lifecycle;
mod routes;

use color_eyre::eyre::eyre;
use futures::future::join_all;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheStorage, CachedResponse, RequestKey};
use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::http::{Network, Request, Response};

pub use lifecycle::Lifecycle;
pub use routes::{Policy, RouteTable};

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh from the network
  Network,
  /// Store hit under the cache-first policy
  Cache,
  /// Store hit after the network failed or returned something uncacheable
  Fallback,
  /// Forwarded without consulting the store
  Passthrough,
}

/// A response handed back for an intercepted request.
#[derive(Debug, Clone)]
pub struct FetchResult {
  pub response: Response,
  pub source: ResponseSource,
}

impl FetchResult {
  fn new(response: Response, source: ResponseSource) -> Self {
    Self { response, source }
  }
}

/// Outcome of a population run.
#[derive(Debug, Default)]
pub struct PopulateReport {
  pub cached: Vec<Url>,
  pub failed: Vec<(Url, String)>,
}

/// Outcome of an activation.
#[derive(Debug, Default)]
pub struct ActivateReport {
  /// Stale stores that were deleted
  pub deleted: Vec<String>,
}

pub struct OfflineProxy<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  routes: Arc<RouteTable>,
  version_tag: String,
  state: Mutex<Lifecycle>,
  /// Detached store writes still in flight
  writes: Mutex<JoinSet<()>>,
}

impl<S: CacheStorage, N: Network> OfflineProxy<S, N> {
  pub fn new(config: &ProxyConfig, storage: Arc<S>, network: Arc<N>) -> Result<Self, ProxyError> {
    let routes = RouteTable::new(config)?;

    Ok(Self {
      storage,
      network,
      routes: Arc::new(routes),
      version_tag: config.version_tag.clone(),
      state: Mutex::new(Lifecycle::Parsed),
      writes: Mutex::new(JoinSet::new()),
    })
  }

  pub fn version_tag(&self) -> &str {
    &self.version_tag
  }

  pub fn routes(&self) -> &RouteTable {
    &self.routes
  }

  pub fn state(&self) -> Lifecycle {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn set_state(&self, next: Lifecycle) {
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    debug!("lifecycle {} -> {}", *state, next);
    *state = next;
  }

  /// Move to `next` if the current state allows `action`.
  fn begin(
    &self,
    action: &'static str,
    allowed: fn(&Lifecycle) -> bool,
    next: Lifecycle,
  ) -> Result<(), ProxyError> {
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    if !allowed(&*state) {
      return Err(ProxyError::InvalidState {
        action,
        state: *state,
      });
    }
    debug!("lifecycle {} -> {}", *state, next);
    *state = next;
    Ok(())
  }

  /// Open the current store and populate it.
  ///
  /// Individual seed failures never fail the install; only failing to open
  /// the store does, which leaves this instance redundant.
  pub async fn on_install(&self) -> Result<PopulateReport, ProxyError> {
    self.begin("install", Lifecycle::can_install, Lifecycle::Installing)?;

    if let Err(e) = self.storage.open(&self.version_tag) {
      self.set_state(Lifecycle::Redundant);
      return Err(e.into());
    }

    let report = self.populate().await;
    info!(
      "installed {}: {} cached, {} failed",
      self.version_tag,
      report.cached.len(),
      report.failed.len()
    );

    // Skip waiting: activation may follow at once, without draining older instances.
    self.set_state(Lifecycle::Installed);
    Ok(report)
  }

  /// Delete stale stores and start controlling clients.
  pub async fn on_activate(&self) -> Result<ActivateReport, ProxyError> {
    let previous = self.state();
    self.begin("activate", Lifecycle::can_activate, Lifecycle::Activating)?;

    let deleted = match self.delete_stale_stores() {
      Ok(deleted) => deleted,
      Err(e) => {
        self.set_state(previous);
        return Err(e);
      }
    };

    // Claim: requests from already-open clients route through this instance now.
    self.set_state(Lifecycle::Activated);
    info!(
      "activated {} (deleted {} stale stores)",
      self.version_tag,
      deleted.len()
    );

    Ok(ActivateReport { deleted })
  }

  fn delete_stale_stores(&self) -> Result<Vec<String>, ProxyError> {
    let mut deleted = Vec::new();
    for name in self.storage.keys()? {
      if name != self.version_tag {
        self.storage.delete(&name)?;
        debug!("deleted stale store {}", name);
        deleted.push(name);
      }
    }
    Ok(deleted)
  }

  /// Boot an instance: install unless the current store already exists, then
  /// activate.
  pub async fn ensure_active(&self) -> Result<(), ProxyError> {
    let state = self.state();
    if state.controls_clients() {
      return Ok(());
    }

    if state == Lifecycle::Parsed {
      if self.storage.has(&self.version_tag)? {
        debug!("store {} already installed", self.version_tag);
        self.set_state(Lifecycle::Installed);
      } else {
        self.on_install().await?;
      }
    }

    self.on_activate().await?;
    Ok(())
  }

  /// Fetch every seed URL and store the successful responses.
  ///
  /// Runs at install and can be re-run by hand to refresh the store.
  pub async fn populate(&self) -> PopulateReport {
    let fetches = self.routes.seeds().iter().map(|url| async move {
      let request = Request::get(url.clone());
      let outcome = match self.network.fetch(&request).await {
        Ok(response) if response.is_populatable() => self
          .storage
          .put(
            &self.version_tag,
            &RequestKey::from_request(&request),
            &response,
          )
          .map_err(|e| e.to_string()),
        Ok(response) => Err(format!(
          "status {} ({})",
          response.status.as_u16(),
          response.response_type.as_str()
        )),
        Err(e) => Err(e.to_string()),
      };
      (url, outcome)
    });

    let mut report = PopulateReport::default();
    for (url, outcome) in join_all(fetches).await {
      match outcome {
        Ok(()) => report.cached.push(url.clone()),
        Err(reason) => {
          warn!("failed to populate {}: {}", url, reason);
          report.failed.push((url.clone(), reason));
        }
      }
    }
    report
  }

  /// Serve one intercepted request.
  pub async fn on_fetch(&self, request: Request) -> Result<FetchResult, ProxyError> {
    if !self.state().controls_clients() {
      debug!("not controlling clients, forwarding {}", request.url);
      return self.passthrough(&request).await;
    }

    // The store only holds GET responses.
    if !request.is_get() {
      return self.passthrough(&request).await;
    }

    let policy = self.routes.classify(&request.url);
    debug!("{} {} -> {}", request.method, request.url, policy);

    match policy {
      Policy::NetworkFirst => self.network_first(&request).await,
      Policy::CacheFirst | Policy::Default => self.cache_first(&request).await,
    }
  }

  async fn passthrough(&self, request: &Request) -> Result<FetchResult, ProxyError> {
    let response = self.network.fetch(request).await?;
    Ok(FetchResult::new(response, ResponseSource::Passthrough))
  }

  async fn network_first(&self, request: &Request) -> Result<FetchResult, ProxyError> {
    let key = RequestKey::from_request(request);

    match self.network.fetch(request).await {
      Ok(response) if response.is_cacheable() => {
        self.spawn_put(key, response.clone());
        Ok(FetchResult::new(response, ResponseSource::Network))
      }
      Ok(response) => {
        debug!(
          "{} returned {} ({}), falling back to cache",
          request.url,
          response.status.as_u16(),
          response.response_type.as_str()
        );
        self.fallback(request, key).await
      }
      Err(e) => {
        debug!("{}, falling back to cache", e);
        self.fallback(request, key).await
      }
    }
  }

  async fn fallback(&self, request: &Request, key: RequestKey) -> Result<FetchResult, ProxyError> {
    match self.lookup(key).await? {
      Some(cached) => Ok(FetchResult::new(cached.response, ResponseSource::Fallback)),
      None => Err(ProxyError::NotFound(request.url.clone())),
    }
  }

  async fn cache_first(&self, request: &Request) -> Result<FetchResult, ProxyError> {
    let key = RequestKey::from_request(request);

    if let Some(cached) = self.lookup(key.clone()).await? {
      return Ok(FetchResult::new(cached.response, ResponseSource::Cache));
    }

    let response = self.network.fetch(request).await?;
    if response.is_cacheable() {
      self.spawn_put(key, response.clone());
    }
    Ok(FetchResult::new(response, ResponseSource::Network))
  }

  /// Read the current store off the async worker, like the background writes.
  async fn lookup(&self, key: RequestKey) -> Result<Option<CachedResponse>, ProxyError> {
    let storage = Arc::clone(&self.storage);
    let store = self.version_tag.clone();

    let cached = tokio::task::spawn_blocking(move || storage.match_request(&store, &key))
      .await
      .map_err(|e| ProxyError::Storage(eyre!("cache lookup task failed: {}", e)))??;
    Ok(cached)
  }

  /// Write a response copy in the background. Failures are logged and dropped.
  fn spawn_put(&self, key: RequestKey, response: Response) {
    let storage = Arc::clone(&self.storage);
    let store = self.version_tag.clone();

    let mut writes = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
    while writes.try_join_next().is_some() {}

    writes.spawn_blocking(move || {
      if let Err(e) = storage.put(&store, &key, &response) {
        warn!("failed to cache {}: {}", key.url, e);
      }
    });
  }

  /// Wait for every background store write started so far.
  pub async fn flush(&self) {
    let mut pending = {
      let mut writes = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
      std::mem::take(&mut *writes)
    };
    while let Some(result) = pending.join_next().await {
      if let Err(e) = result {
        warn!("cache write task failed: {}", e);
      }
    }
  }
}
