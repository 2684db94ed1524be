//! Backend health probing over HTTP

use crate::config::BackendConfig;
use crate::wake::{HealthProbe, HealthStatus};
use http_body_util::Empty;
use hyper::body::Bytes;
use hyper::{Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tracing::debug;

/// Probes the backend with a single bounded `GET`
///
/// Connections are never kept idle, so each probe opens and closes its own.
#[derive(Clone)]
pub struct HttpProber {
    client: Client<HttpConnector, Empty<Bytes>>,
    uri: Uri,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(uri: Uri, timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.enforce_http(true);
        connector.set_connect_timeout(Some(timeout));

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .build(connector);

        Self {
            client,
            uri,
            timeout,
        }
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self, http::uri::InvalidUri> {
        let uri: Uri = format!("{}{}", config.base_url(), config.health_path).parse()?;
        Ok(Self::new(uri, config.probe_timeout()))
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    async fn check(&self) -> HealthStatus {
        let req = match Request::builder()
            .method("GET")
            .uri(self.uri.clone())
            .body(Empty::<Bytes>::new())
        {
            Ok(r) => r,
            Err(_) => return HealthStatus::Down,
        };

        match tokio::time::timeout(self.timeout, self.client.request(req)).await {
            Ok(Ok(response)) if response.status().is_success() => {
                debug!(uri = %self.uri, status = %response.status(), "Health probe passed");
                HealthStatus::Up
            }
            Ok(Ok(response)) => {
                debug!(uri = %self.uri, status = %response.status(), "Health probe failed (status)");
                HealthStatus::Down
            }
            Ok(Err(e)) => {
                debug!(uri = %self.uri, error = %e, "Health probe failed (connection error)");
                HealthStatus::Down
            }
            Err(_) => {
                debug!(uri = %self.uri, timeout_ms = self.timeout.as_millis() as u64, "Health probe failed (timeout)");
                HealthStatus::Down
            }
        }
    }
}

impl HealthProbe for HttpProber {
    async fn probe(&self) -> HealthStatus {
        self.check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve `response` verbatim to every connection after `delay`
    async fn raw_server(response: &'static str, delay: Duration) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = stream.read(&mut buf).await;
                    tokio::time::sleep(delay).await;
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });
        port
    }

    fn prober(port: u16, timeout: Duration) -> HttpProber {
        let uri: Uri = format!("http://127.0.0.1:{}/", port).parse().unwrap();
        HttpProber::new(uri, timeout)
    }

    #[tokio::test]
    async fn test_probe_up_on_200() {
        let port = raw_server(
            "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
            Duration::ZERO,
        )
        .await;
        assert_eq!(prober(port, Duration::from_secs(2)).probe().await, HealthStatus::Up);
    }

    #[tokio::test]
    async fn test_probe_down_on_error_status() {
        let port = raw_server(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            Duration::ZERO,
        )
        .await;
        assert_eq!(prober(port, Duration::from_secs(2)).probe().await, HealthStatus::Down);
    }

    #[tokio::test]
    async fn test_probe_down_when_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert_eq!(prober(port, Duration::from_secs(2)).probe().await, HealthStatus::Down);
    }

    #[tokio::test]
    async fn test_probe_down_on_timeout() {
        let port = raw_server(
            "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            Duration::from_secs(5),
        )
        .await;

        let start = std::time::Instant::now();
        let status = prober(port, Duration::from_millis(200)).probe().await;
        assert_eq!(status, HealthStatus::Down);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_from_config_builds_health_uri() {
        let config: crate::config::Config = crate::config::Config::from_toml(
            r#"
[server]
listen = "127.0.0.1:8080"

[backend]
mac_address = "01:23:45:67:89:ab"
address = "10.0.0.5:8000"
wol_port = 9
poll_interval_ms = 100
retry_attempts = 3
health_path = "/healthz"
"#,
        )
        .unwrap();

        let prober = HttpProber::from_config(&config.backend).unwrap();
        assert_eq!(prober.uri().to_string(), "http://10.0.0.5:8000/healthz");
    }
}
