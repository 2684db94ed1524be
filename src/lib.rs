//! Wakegate - A reverse proxy that wakes its backend on demand
//!
//! This library provides a reverse proxy for a single backend machine that
//! may be powered off:
//! - Probes the backend over HTTP on every request
//! - Broadcasts a Wake-on-LAN magic packet when the backend is down
//! - Polls the backend within a bounded retry budget until it answers
//! - Forwards the original request and streams the response back unmodified

pub mod config;
pub mod error;
pub mod magic;
pub mod pool;
pub mod probe;
pub mod proxy;
pub mod wake;
pub mod wol;
