//! Error taxonomy and JSON error responses for the gateway

use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;
use thiserror::Error;

/// Errors raised while configuring the gateway or serving a request
///
/// Configuration and address errors are fatal at startup. Everything else is
/// scoped to the request that hit it and is turned into an HTTP response.
#[derive(Debug, Error)]
pub enum WakeError {
    /// Hardware address is not six hex octets
    #[error("invalid hardware address '{0}': expected 6 hex octets")]
    InvalidAddress(String),

    /// Configuration file could not be read
    #[error("failed to read configuration file {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid TOML for the expected schema
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration parsed but failed validation
    #[error("Configuration errors:\n  - {}", .0.join("\n  - "))]
    ConfigInvalid(Vec<String>),

    /// Wake packet could not be handed to the network layer
    #[error("failed to send wake packet to {target}: {source}")]
    TransmitFailed {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// Backend never answered a probe within the retry budget
    #[error("backend did not come up after {attempts} polls")]
    RetryExhausted { attempts: u32 },

    /// Backend was reported up but the forwarded request failed
    #[error("failed to forward request to backend: {0}")]
    ForwardFailed(String),
}

impl WakeError {
    /// Error code reported to the caller for this error
    pub fn code(&self) -> ProxyErrorCode {
        match self {
            WakeError::TransmitFailed { .. } => ProxyErrorCode::WakeFailed,
            WakeError::RetryExhausted { .. } => ProxyErrorCode::RetryExhausted,
            WakeError::ForwardFailed(_) => ProxyErrorCode::ForwardFailed,
            WakeError::InvalidAddress(_)
            | WakeError::ConfigRead { .. }
            | WakeError::ConfigParse(_)
            | WakeError::ConfigInvalid(_) => ProxyErrorCode::InternalError,
        }
    }
}

/// Error codes for gateway errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProxyErrorCode {
    /// Wake packet could not be sent
    WakeFailed,
    /// Backend did not wake up in time
    RetryExhausted,
    /// Forwarding to the backend failed after it was reported up
    ForwardFailed,
    /// Internal gateway error
    InternalError,
}

impl ProxyErrorCode {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyErrorCode::WakeFailed => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyErrorCode::RetryExhausted => StatusCode::GATEWAY_TIMEOUT,
            ProxyErrorCode::ForwardFailed => StatusCode::BAD_GATEWAY,
            ProxyErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code as a string for the X-Proxy-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            ProxyErrorCode::WakeFailed => "WAKE_FAILED",
            ProxyErrorCode::RetryExhausted => "RETRY_EXHAUSTED",
            ProxyErrorCode::ForwardFailed => "FORWARD_FAILED",
            ProxyErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: ProxyErrorCode,
    pub message: String,
    /// HTTP status code (for reference)
    pub status: u16,
}

impl ErrorResponse {
    pub fn new(code: ProxyErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code().as_u16(),
            code,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"code":"{}","message":"{}","status":{}}}"#,
                self.code.as_header_value(),
                self.message.replace('\"', "\\\""),
                self.status
            )
        })
    }
}

/// Create a JSON error response with X-Proxy-Error header
pub fn json_error_response(
    code: ProxyErrorCode,
    message: impl Into<String>,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let error = ErrorResponse::new(code, message);
    let status = code.status_code();
    let body = error.to_json();

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("X-Proxy-Error", code.as_header_value())
        .body(Full::new(Bytes::from(body)).map_err(|e| match e {}).boxed())
        .expect("valid response with StatusCode enum and static headers")
}
