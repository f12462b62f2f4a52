//! reqwest-backed transport
//!
//! One shared [`reqwest::Client`] per session so connection pooling works across
//! all concurrent page requests. The client carries explicit connect and request
//! timeouts to prevent indefinite hangs; the session applies its own timeout on
//! top, so either one firing ends the attempt.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::downloader::config::FetchConfig;
use crate::fetcher::{RawResponse, Transport, TransportError, TransportResult};
use crate::Request;

/// HTTP connect timeout (seconds) - time to establish TCP connection
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Build the HTTP client used by [`ReqwestTransport`].
///
/// # Errors
/// Returns [`TransportError::InvalidRequest`] when the proxy URL is invalid or
/// the TLS backend cannot be initialised.
pub fn build_client(config: &FetchConfig) -> TransportResult<Client> {
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
        .timeout(config.timeout());

    if let Some(proxy) = &config.proxy {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| TransportError::InvalidRequest(format!("invalid proxy: {e}")))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| TransportError::InvalidRequest(format!("failed to build HTTP client: {e}")))
}

/// [`Transport`] over a shared reqwest client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Arc<Client>,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Create a transport with a client built from `config`.
    pub fn new(config: &FetchConfig) -> TransportResult<Self> {
        Ok(Self {
            client: Arc::new(build_client(config)?),
            timeout: config.timeout(),
        })
    }

    /// Wrap an existing client.
    pub fn with_client(client: Arc<Client>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn map_error(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_builder() {
            TransportError::InvalidRequest(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, request: &Request) -> TransportResult<RawResponse> {
        let mut builder = self.client.get(request.endpoint()).query(request.params());
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }

        debug!(
            endpoint = request.endpoint(),
            page = request.page(),
            "Sending GET request"
        );

        let response = builder.send().await.map_err(|e| self.map_error(e))?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| self.map_error(e))?;

        Ok(RawResponse::new(status, body.to_vec()))
    }
}
