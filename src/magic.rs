//! Wake-on-LAN magic packet encoding
//!
//! A magic packet is six `0xFF` synchronization bytes followed by the target's
//! hardware address repeated sixteen times.

use crate::error::WakeError;
use std::fmt;
use std::str::FromStr;

/// Number of synchronization bytes at the start of a packet
const SYNC_LEN: usize = 6;

/// How many times the hardware address is repeated
const MAC_REPEAT: usize = 16;

/// Total packet length in bytes
pub const MAGIC_PACKET_LEN: usize = SYNC_LEN + MAC_REPEAT * 6;

/// A 6-octet hardware (MAC) address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for MacAddress {
    type Err = WakeError;

    /// Parse `aa:bb:cc:dd:ee:ff`, `aa-bb-cc-dd-ee-ff` or `aabb.ccdd.eeff`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || WakeError::InvalidAddress(s.to_string());
        let text = s.trim();

        let separator = [':', '-', '.']
            .into_iter()
            .find(|c| text.contains(*c))
            .ok_or_else(invalid)?;
        let groups: Vec<&str> = text.split(separator).collect();

        // Dotted form uses three groups of four hex digits
        let group_len = if separator == '.' { 4 } else { 2 };
        if groups.len() * group_len != 12 {
            return Err(invalid());
        }

        let mut octets = [0u8; 6];
        let mut idx = 0;
        for group in groups {
            if group.len() != group_len || !group.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            for pair in group.as_bytes().chunks(2) {
                let pair = std::str::from_utf8(pair).map_err(|_| invalid())?;
                octets[idx] = u8::from_str_radix(pair, 16).map_err(|_| invalid())?;
                idx += 1;
            }
        }

        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// The encoded wake payload for one hardware address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagicPacket {
    bytes: [u8; MAGIC_PACKET_LEN],
}

impl MagicPacket {
    pub fn new(mac: &MacAddress) -> Self {
        let mut bytes = [0xFF; MAGIC_PACKET_LEN];
        for chunk in bytes[SYNC_LEN..].chunks_exact_mut(6) {
            chunk.copy_from_slice(&mac.0);
        }
        Self { bytes }
    }

    /// Parse a textual hardware address and encode it
    pub fn from_mac_str(mac: &str) -> Result<Self, WakeError> {
        Ok(Self::new(&mac.parse()?))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}
