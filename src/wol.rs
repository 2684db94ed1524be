//! Wake-on-LAN transmission
//!
//! Sends a magic packet as a single UDP datagram. Delivery is best-effort:
//! success only means the datagram was handed to the network stack.

use crate::config::BackendConfig;
use crate::error::WakeError;
use crate::magic::{MacAddress, MagicPacket};
use crate::wake::WakeSender;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::UdpSocket;
use tracing::{debug, info};

/// Send `packet` once to `host:port` from a fresh broadcast-enabled socket
///
/// Returns the resolved destination. The socket is dropped on every path.
pub async fn send_magic_packet(
    packet: &MagicPacket,
    host: &str,
    port: u16,
) -> Result<SocketAddr, WakeError> {
    let target = format!("{}:{}", host, port);
    let failed = |source: std::io::Error| WakeError::TransmitFailed {
        target: target.clone(),
        source,
    };

    let dest = tokio::net::lookup_host((host, port))
        .await
        .map_err(failed)?
        .next()
        .ok_or_else(|| {
            failed(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "destination resolved to no addresses",
            ))
        })?;

    let bind_addr: SocketAddr = if dest.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };

    let socket = UdpSocket::bind(bind_addr).await.map_err(failed)?;
    socket.set_broadcast(true).map_err(failed)?;

    let sent = socket
        .send_to(packet.as_bytes(), dest)
        .await
        .map_err(failed)?;
    if sent != packet.as_bytes().len() {
        return Err(failed(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            format!("short send: {} of {} bytes", sent, packet.as_bytes().len()),
        )));
    }

    debug!(dest = %dest, bytes = sent, "Magic packet sent");
    Ok(dest)
}

/// Wakes one machine by broadcasting its magic packet over UDP
#[derive(Debug, Clone)]
pub struct UdpWaker {
    mac: MacAddress,
    broadcast_address: String,
    port: u16,
}

impl UdpWaker {
    pub fn new(mac: MacAddress, broadcast_address: impl Into<String>, port: u16) -> Self {
        Self {
            mac,
            broadcast_address: broadcast_address.into(),
            port,
        }
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self, WakeError> {
        Ok(Self::new(
            config.hardware_address()?,
            config.broadcast_address.clone(),
            config.wol_port,
        ))
    }

    pub fn mac(&self) -> MacAddress {
        self.mac
    }
}

impl WakeSender for UdpWaker {
    async fn send_wake(&self) -> Result<(), WakeError> {
        let packet = MagicPacket::new(&self.mac);
        let dest = send_magic_packet(&packet, &self.broadcast_address, self.port).await?;
        info!(mac = %self.mac, dest = %dest, "Wake-on-LAN packet transmitted");
        Ok(())
    }
}
