//! URL classification table.

use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use url::Url;

use crate::config::ProxyConfig;
use crate::error::ProxyError;

/// Servicing policy for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
  /// Try the network, fall back to the store
  NetworkFirst,
  /// Try the store, fetch on miss
  CacheFirst,
  /// Not listed anywhere; served like `CacheFirst`
  Default,
}

impl fmt::Display for Policy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::NetworkFirst => "network-first",
      Self::CacheFirst => "cache-first",
      Self::Default => "default (cache-first)",
    };
    f.write_str(s)
  }
}

/// Immutable partition of known URLs into policies.
///
/// Network-first wins when a URL is listed in both tables.
#[derive(Debug, Clone)]
pub struct RouteTable {
  network_first: HashSet<Url>,
  cache_first: HashSet<Url>,
  cache_first_hosts: Vec<String>,
  project_data: Regex,
  /// Every listed URL, cache-first entries first, in table order
  seeds: Vec<Url>,
}

impl RouteTable {
  pub fn new(config: &ProxyConfig) -> Result<Self, ProxyError> {
    let network_first = resolve_all(&config.origin, &config.network_first)?;
    let cache_first = resolve_all(&config.origin, &config.cache_first)?;

    let project_data = Regex::new(&config.project_data_pattern).map_err(|e| {
      ProxyError::Config(format!(
        "invalid project data pattern '{}': {}",
        config.project_data_pattern, e
      ))
    })?;

    let mut seeds: Vec<Url> = Vec::with_capacity(cache_first.len() + network_first.len());
    for url in cache_first.iter().chain(network_first.iter()) {
      if !seeds.contains(url) {
        seeds.push(url.clone());
      }
    }

    Ok(Self {
      network_first: network_first.into_iter().collect(),
      cache_first: cache_first.into_iter().collect(),
      cache_first_hosts: config
        .cache_first_hosts
        .iter()
        .map(|h| h.to_ascii_lowercase())
        .collect(),
      project_data,
      seeds,
    })
  }

  /// Classify a request URL. Pure: depends only on the URL and the table.
  pub fn classify(&self, url: &Url) -> Policy {
    let mut url = url.clone();
    url.set_fragment(None);

    if self.network_first.contains(&url) || self.project_data.is_match(url.as_str()) {
      return Policy::NetworkFirst;
    }

    let listed_host = url
      .host_str()
      .is_some_and(|host| self.cache_first_hosts.iter().any(|h| h == host));

    if self.cache_first.contains(&url) || listed_host {
      return Policy::CacheFirst;
    }

    Policy::Default
  }

  /// URLs fetched by population.
  pub fn seeds(&self) -> &[Url] {
    &self.seeds
  }
}

fn resolve_all(origin: &Url, entries: &[String]) -> Result<Vec<Url>, ProxyError> {
  entries
    .iter()
    .map(|entry| {
      origin
        .join(entry)
        .map_err(|e| ProxyError::Config(format!("invalid URL '{}': {}", entry, e)))
    })
    .collect()
}
