use crate::config::Config;
use crate::error::{json_error_response, WakeError};
use crate::pool::{ConnectionPool, PoolConfig};
use crate::probe::HttpProber;
use crate::wake::{RetryPolicy, WakeOrchestrator};
use crate::wol::UdpWaker;
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::header::HeaderValue;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Header name for request ID
const X_REQUEST_ID: &str = "x-request-id";
/// Header name for forwarded-for
const X_FORWARDED_FOR: &str = "x-forwarded-for";
/// Header name for forwarded host
const X_FORWARDED_HOST: &str = "x-forwarded-host";
/// Header name for forwarded proto
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Everything a request handler needs, shared read-only across connections
struct Gateway {
    orchestrator: WakeOrchestrator<HttpProber, UdpWaker>,
    pool: ConnectionPool,
    request_timeout: Duration,
}

/// The wake-on-demand reverse proxy server
pub struct ProxyServer {
    bind_addr: SocketAddr,
    gateway: Arc<Gateway>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ProxyServer {
    /// Build a server from validated configuration
    ///
    /// Fails only on configuration that should have been caught by
    /// `Config::validate`.
    pub fn new(config: &Config, shutdown_rx: watch::Receiver<bool>) -> Result<Self, WakeError> {
        let bind_addr = config.server.listen_addr()?;
        let backend = &config.backend;

        let prober = HttpProber::from_config(backend).map_err(|e| {
            WakeError::ConfigInvalid(vec![format!("backend health URI is invalid: {}", e)])
        })?;
        let waker = UdpWaker::from_config(backend)?;
        let orchestrator = WakeOrchestrator::new(prober, waker, RetryPolicy::from_config(backend));

        let pool_config = PoolConfig {
            max_idle_per_host: config.server.pool_max_idle_per_host,
            idle_timeout: Duration::from_secs(config.server.pool_idle_timeout_secs),
        };
        let pool = ConnectionPool::new(backend.base_url(), pool_config);

        Ok(Self {
            bind_addr,
            gateway: Arc::new(Gateway {
                orchestrator,
                pool,
                request_timeout: backend.request_timeout(),
            }),
            shutdown_rx,
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown is signalled
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "Proxy server listening (HTTP/1.1 and HTTP/2)");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let gateway = Arc::clone(&self.gateway);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, addr, gateway).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    // A dropped sender also means shutdown
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Proxy server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    gateway: Arc<Gateway>,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let gateway = Arc::clone(&gateway);
        async move { handle_request(req, gateway, addr).await }
    });

    AutoBuilder::new(TokioExecutor::new())
        .http1()
        .preserve_header_case(true)
        .http2()
        .max_concurrent_streams(250)
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

async fn handle_request(
    mut req: Request<Incoming>,
    gateway: Arc<Gateway>,
    client_addr: SocketAddr,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    // Generate or propagate request ID
    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    // This proxy is the first trusted hop, so client-supplied X-Forwarded-* values are overwritten
    let headers = req.headers_mut();

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(X_REQUEST_ID, value);
    }

    if let Ok(value) = HeaderValue::from_str(&client_addr.ip().to_string()) {
        headers.insert(X_FORWARDED_FOR, value);
    }

    if let Some(host) = headers.get(hyper::header::HOST).cloned() {
        headers.insert(X_FORWARDED_HOST, host);
    }

    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));

    debug!(method = %req.method(), uri = %req.uri(), request_id, "Incoming request");

    // Make sure the backend is awake before forwarding
    match gateway.orchestrator.ensure_up().await {
        Ok(report) => {
            if report.woke {
                info!(request_id, polls = report.polls, "Backend woke up, forwarding request");
            }
        }
        Err(e) => {
            let message = match &e {
                WakeError::RetryExhausted { .. } => "Backend is not responding",
                WakeError::TransmitFailed { .. } => "Failed to send Wake-on-LAN packet",
                _ => "Backend unavailable",
            };
            error!(request_id, error = %e, "Wake sequence failed");
            return Ok(json_error_response(e.code(), message));
        }
    }

    debug!(request_id, backend = gateway.pool.base_url(), "Forwarding request to backend");

    // The backend may have gone down again since the last probe; that is reported, not retried
    let result = tokio::time::timeout(gateway.request_timeout, gateway.pool.send_request(req)).await;

    match result {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => {
            error!(request_id, error = %e, "Failed to forward request");
            Ok(json_error_response(e.code(), "Failed to reach backend"))
        }
        Err(_) => {
            let e = WakeError::ForwardFailed(format!(
                "no response within {} seconds",
                gateway.request_timeout.as_secs()
            ));
            warn!(request_id, error = %e, "Backend response timed out");
            Ok(json_error_response(e.code(), "Failed to reach backend"))
        }
    }
}
