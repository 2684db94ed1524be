//! Connection pool for forwarding requests to the backend
//!
//! Forwarded requests reuse idle HTTP connections to the backend. Health
//! probes do not go through this pool.

use crate::error::WakeError;
use http_body_util::{combinators::BoxBody, BodyExt};
use hyper::body::{Bytes, Incoming};
use hyper::header::HeaderMap;
use hyper::{Request, Response};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tracing::debug;

/// Headers that describe a single connection and must not be forwarded
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Check whether a header only applies to one hop
pub fn is_hop_by_hop_header(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Remove hop-by-hop headers, including any named by `Connection`
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<String> = headers
        .get_all(hyper::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect();

    for name in named {
        headers.remove(name.as_str());
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

/// Configuration for the connection pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum idle connections per host
    pub max_idle_per_host: usize,
    /// Idle connection timeout
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 10,
            idle_timeout: Duration::from_secs(90),
        }
    }
}

/// A pooled HTTP client bound to one backend
pub struct ConnectionPool {
    client: Client<HttpConnector, Incoming>,
    base_url: String,
    config: PoolConfig,
}

impl ConnectionPool {
    /// Create a pool forwarding to `base_url` (e.g. "http://10.0.0.5:8000")
    pub fn new(base_url: impl Into<String>, config: PoolConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.enforce_http(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(config.idle_timeout)
            .build(connector);

        let base_url = base_url.into();
        debug!(
            backend = %base_url,
            max_idle = config.max_idle_per_host,
            idle_timeout_secs = config.idle_timeout.as_secs(),
            "Connection pool initialized"
        );

        Self {
            client,
            base_url,
            config,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Forward a request to the backend, preserving method, path, query,
    /// end-to-end headers and the streamed body
    pub async fn send_request(
        &self,
        req: Request<Incoming>,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>, WakeError> {
        let path = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let uri = format!("{}{}", self.base_url, path);

        let (parts, body) = req.into_parts();
        let mut builder = Request::builder()
            .method(parts.method)
            .uri(&uri);

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        for (key, value) in headers.iter() {
            builder = builder.header(key, value);
        }

        let backend_req = builder
            .body(body)
            .map_err(|e| WakeError::ForwardFailed(format!("request build error: {}", e)))?;

        let response = self
            .client
            .request(backend_req)
            .await
            .map_err(|e| WakeError::ForwardFailed(e.to_string()))?;

        // Body is streamed through, never buffered
        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, body.boxed()))
    }
}
