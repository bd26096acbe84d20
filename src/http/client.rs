use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{self, HeaderMap};
use reqwest::Client;
use url::{Origin, Url};

use super::{Network, NetworkError, Request, Response, ResponseType};
use crate::config::NetworkConfig;

/// Network implementation backed by reqwest.
///
/// Responses are typed relative to `origin`, the site the proxy fronts: anything
/// that starts and ends on that origin is basic, cross-origin responses are cors
/// when the remote sends `Access-Control-Allow-Origin`, opaque otherwise.
#[derive(Clone)]
pub struct HttpNetwork {
  client: Client,
  origin: Origin,
}

impl HttpNetwork {
  pub fn new(origin: &Url, config: &NetworkConfig) -> Result<Self> {
    let mut builder = Client::builder().user_agent(&config.user_agent);
    if let Some(timeout) = config.timeout() {
      builder = builder.timeout(timeout);
    }

    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self {
      client,
      origin: origin.origin(),
    })
  }

  fn response_type(&self, requested: &Url, final_url: &Url, headers: &HeaderMap) -> ResponseType {
    if requested.origin() == self.origin && final_url.origin() == self.origin {
      ResponseType::Basic
    } else if headers.contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN) {
      ResponseType::Cors
    } else {
      ResponseType::Opaque
    }
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    let url = request.url.clone();

    let response = self
      .client
      .request(request.method.clone(), url.clone())
      .headers(request.headers.clone())
      .send()
      .await
      .map_err(|e| classify_error(&url, e))?;

    let status = response.status();
    let final_url = response.url().clone();
    let headers = response.headers().clone();
    let response_type = self.response_type(&url, &final_url, &headers);
    let redirected = final_url != url;

    let body = response.bytes().await.map_err(|e| classify_error(&url, e))?;

    tracing::debug!(
      "fetched {} {} -> {} ({} bytes, {})",
      request.method,
      url,
      status.as_u16(),
      body.len(),
      response_type.as_str()
    );

    Ok(Response {
      status,
      headers,
      body,
      response_type,
      redirected,
    })
  }
}

fn classify_error(url: &Url, e: reqwest::Error) -> NetworkError {
  if e.is_timeout() {
    NetworkError::Timeout { url: url.clone() }
  } else if e.is_connect() {
    NetworkError::Connect {
      url: url.clone(),
      message: e.to_string(),
    }
  } else {
    NetworkError::Request {
      url: url.clone(),
      message: e.to_string(),
    }
  }
}
