//! Request/response types and the network seam the proxy fetches through.

mod client;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use url::Url;

pub use client::HttpNetwork;

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: HeaderMap,
}

impl Request {
  /// A plain GET for the given URL.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      headers: HeaderMap::new(),
    }
  }

  pub fn is_get(&self) -> bool {
    self.method == Method::GET
  }
}

/// How a response relates to the origin that requested it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
  /// Same-origin response; body and headers fully readable
  Basic,
  /// Cross-origin response the remote explicitly shared
  Cors,
  /// Cross-origin response with no sharing headers
  Opaque,
}

impl ResponseType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "basic" => Some(Self::Basic),
      "cors" => Some(Self::Cors),
      "opaque" => Some(Self::Opaque),
      _ => None,
    }
  }
}

/// A fetched or cached response.
///
/// The body is reference counted, so `clone()` duplicates the response without
/// consuming or emptying the original.
#[derive(Debug, Clone)]
pub struct Response {
  pub status: StatusCode,
  pub headers: HeaderMap,
  pub body: Bytes,
  pub response_type: ResponseType,
  /// Whether the network followed a redirect to produce this response
  pub redirected: bool,
}

impl Response {
  /// Whether the proxy may write this response into the store at runtime:
  /// a 200 from the same origin, reached without a redirect.
  pub fn is_cacheable(&self) -> bool {
    self.status == StatusCode::OK && self.response_type == ResponseType::Basic && !self.redirected
  }

  /// Whether population may store this response. Population accepts any 2xx
  /// whose body is readable, which keeps shared cross-origin assets like font
  /// stylesheets.
  pub fn is_populatable(&self) -> bool {
    self.status.is_success() && self.response_type != ResponseType::Opaque
  }
}

/// Failure of the network collaborator itself (no response at all).
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
  #[error("failed to connect to {url}: {message}")]
  Connect { url: Url, message: String },

  #[error("request to {url} timed out")]
  Timeout { url: Url },

  #[error("request to {url} failed: {message}")]
  Request { url: Url, message: String },
}

/// The network a proxy forwards requests to.
#[async_trait]
pub trait Network: Send + Sync + 'static {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

#[cfg(test)]
mod tests {
  use super::*;

  fn response(status: u16, response_type: ResponseType) -> Response {
    Response {
      status: StatusCode::from_u16(status).unwrap(),
      headers: HeaderMap::new(),
      body: Bytes::from_static(b"body"),
      response_type,
      redirected: false,
    }
  }

  #[test]
  fn test_cacheable_requires_200_basic() {
    assert!(response(200, ResponseType::Basic).is_cacheable());
    assert!(!response(204, ResponseType::Basic).is_cacheable());
    assert!(!response(404, ResponseType::Basic).is_cacheable());
    assert!(!response(200, ResponseType::Cors).is_cacheable());
    assert!(!response(200, ResponseType::Opaque).is_cacheable());
  }

  #[test]
  fn test_redirected_not_cacheable() {
    let mut r = response(200, ResponseType::Basic);
    r.redirected = true;
    assert!(!r.is_cacheable());
  }

  #[test]
  fn test_populatable_accepts_cors_2xx() {
    assert!(response(200, ResponseType::Cors).is_populatable());
    assert!(response(203, ResponseType::Basic).is_populatable());
    assert!(!response(200, ResponseType::Opaque).is_populatable());
    assert!(!response(500, ResponseType::Basic).is_populatable());
  }

  #[test]
  fn test_clone_keeps_body() {
    let original = response(200, ResponseType::Basic);
    let copy = original.clone();
    drop(copy);
    assert_eq!(&original.body[..], b"body");
  }

  #[test]
  fn test_response_type_names() {
    for t in [ResponseType::Basic, ResponseType::Cors, ResponseType::Opaque] {
      assert_eq!(ResponseType::parse(t.as_str()), Some(t));
    }
    assert_eq!(ResponseType::parse("error"), None);
  }
}
