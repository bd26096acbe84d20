//! Errors surfaced by the proxy to whoever issued a request.

use url::Url;

use crate::http::NetworkError;
use crate::proxy::Lifecycle;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
  /// The network failed and nothing cached could stand in for it.
  #[error(transparent)]
  Network(#[from] NetworkError),

  /// Network-first request with no usable network response and no cached entry.
  #[error("no response available for {0}")]
  NotFound(Url),

  #[error("cache storage error: {0}")]
  Storage(color_eyre::Report),

  #[error("cannot {action} while {state}")]
  InvalidState {
    action: &'static str,
    state: Lifecycle,
  },

  #[error("invalid proxy configuration: {0}")]
  Config(String),
}

impl From<color_eyre::Report> for ProxyError {
  fn from(report: color_eyre::Report) -> Self {
    Self::Storage(report)
  }
}
