use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use wakegate::config::Config;
use wakegate::proxy::ProxyServer;
use wakegate::wake::RetryPolicy;

pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("wakegate=debug".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path.display(), error = %e, "Failed to load configuration");
        e
    })?;

    info!(path = %config_path.display(), "Configuration loaded");

    print_startup_banner(&config);

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let proxy = ProxyServer::new(&config, shutdown_rx)?;
    let proxy_handle = tokio::spawn(async move {
        if let Err(e) = proxy.run().await {
            error!(error = %e, "Proxy server error");
        }
    });

    // Wait for shutdown signal (Ctrl+C or SIGTERM)
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down...");
    }

    // Signal shutdown
    let _ = shutdown_tx.send(true);

    // Wait for the listener to stop (with timeout)
    let _ = tokio::time::timeout(Duration::from_secs(5), proxy_handle).await;

    info!("Shutdown complete");
    Ok(())
}

fn print_startup_banner(config: &Config) {
    info!(
        name = PKG_NAME,
        version = VERSION,
        "Starting wake-on-demand proxy"
    );
    info!(
        listen = %config.server.listen,
        backend = %config.backend.address,
        "Proxying requests"
    );
    info!(
        mac = %config.backend.mac_address,
        broadcast = %config.backend.broadcast_address,
        wol_port = config.backend.wol_port,
        "Wake-on-LAN settings"
    );
    let policy = RetryPolicy::from_config(&config.backend);
    info!(
        health_path = %config.backend.health_path,
        probe_timeout_ms = config.backend.probe_timeout_ms,
        poll_interval_ms = config.backend.poll_interval_ms,
        retry_attempts = config.backend.retry_attempts,
        worst_case_wait_secs = policy.worst_case_wait().as_secs(),
        "Health check settings"
    );
    info!(
        pool_max_idle = config.server.pool_max_idle_per_host,
        pool_idle_timeout_secs = config.server.pool_idle_timeout_secs,
        request_timeout_secs = config.backend.request_timeout_secs,
        "Forwarding settings"
    );
}
