use crate::error::WakeError;
use crate::magic::MacAddress;
use http::uri::Authority;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Global configuration for the gateway
///
/// Loaded once at startup and shared read-only afterwards.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Listener configuration
    pub server: ServerConfig,

    /// The single backend this gateway fronts
    pub backend: BackendConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Address the gateway listens on, e.g. "0.0.0.0:8080"
    pub listen: String,

    /// Maximum idle forwarding connections kept to the backend (default: 10)
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    /// Idle forwarding connection timeout in seconds (default: 90)
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,
}

impl ServerConfig {
    pub fn listen_addr(&self) -> Result<SocketAddr, WakeError> {
        self.listen.parse().map_err(|e| {
            WakeError::ConfigInvalid(vec![format!(
                "server.listen '{}' is not a socket address: {}",
                self.listen, e
            )])
        })
    }
}

/// Configuration for the backend machine
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    /// Hardware address of the backend's network interface
    pub mac_address: String,

    /// Network address of the backend HTTP server, "host" or "host:port"
    pub address: String,

    /// UDP port the wake packet is sent to
    pub wol_port: u16,

    /// Delay between health probes while waiting for the backend, in milliseconds
    pub poll_interval_ms: u64,

    /// Maximum number of polls after the wake packet before giving up
    pub retry_attempts: u32,

    /// Destination for the wake packet (default: 255.255.255.255)
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: String,

    /// Timeout for a single health probe in milliseconds (default: 2000)
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    /// Path requested by health probes (default: "/")
    #[serde(default = "default_health_path")]
    pub health_path: String,

    /// Max time to wait for the backend's response headers when forwarding (default: 30)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl BackendConfig {
    pub fn hardware_address(&self) -> Result<MacAddress, WakeError> {
        self.mac_address.parse()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Base URL of the backend, without a trailing slash
    pub fn base_url(&self) -> String {
        format!("http://{}", self.address)
    }

    /// Validate the backend configuration, returning every problem found
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if let Err(e) = self.hardware_address() {
            errors.push(format!("backend.mac_address: {}", e));
        }

        if self.address.is_empty() {
            errors.push("backend.address must not be empty".to_string());
        } else if self.address.parse::<Authority>().is_err() || self.address.contains('@') {
            errors.push(format!(
                "backend.address '{}' is not a valid host[:port]",
                self.address
            ));
        }

        if self.broadcast_address.is_empty() {
            errors.push("backend.broadcast_address must not be empty".to_string());
        }

        if self.wol_port == 0 {
            errors.push("backend.wol_port must be greater than 0".to_string());
        }

        if self.poll_interval_ms == 0 {
            errors.push("backend.poll_interval_ms must be greater than 0".to_string());
        }

        if self.retry_attempts == 0 {
            errors.push("backend.retry_attempts must be greater than 0".to_string());
        }

        if self.probe_timeout_ms == 0 {
            errors.push("backend.probe_timeout_ms must be greater than 0".to_string());
        }

        if !self.health_path.starts_with('/') {
            errors.push(format!(
                "backend.health_path '{}' must start with '/'",
                self.health_path
            ));
        }

        if self.request_timeout_secs == 0 {
            errors.push("backend.request_timeout_secs must be greater than 0".to_string());
        }

        errors
    }
}

// Default value functions
fn default_pool_max_idle_per_host() -> usize {
    10
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_broadcast_address() -> String {
    "255.255.255.255".to_string()
}

fn default_probe_timeout() -> u64 {
    2000
}

fn default_health_path() -> String {
    "/".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, WakeError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| WakeError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, WakeError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration
    pub fn validate(&self) -> Result<(), WakeError> {
        let mut errors = Vec::new();

        if let Err(WakeError::ConfigInvalid(e)) = self.server.listen_addr() {
            errors.extend(e);
        }
        errors.extend(self.backend.validate());

        if !errors.is_empty() {
            return Err(WakeError::ConfigInvalid(errors));
        }

        Ok(())
    }
}
