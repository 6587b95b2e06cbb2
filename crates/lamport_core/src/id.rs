//! Peer identity and addressing.
//!
//! A peer is known to the rest of the cluster by the address it advertises.
//! Its [`PeerId`] is derived from that address, so every node computes the
//! same id for the same peer without any coordination.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Multiplier applied to the port when packing an IPv4 address.
///
/// The packed octets stay below `256 * 1000^3`, so every host:port pair maps
/// to a distinct id.
const PORT_FACTOR: u64 = 1_000_000_000_000;

/// Network address of a peer, as `host:port`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerAddress {
    host: String,
    port: u16,
}

impl PeerAddress {
    /// Create a new address
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host part
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port part
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Same host, different port
    #[must_use]
    pub fn with_port(&self, port: u16) -> Self {
        Self::new(self.host.clone(), port)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for PeerAddress {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        let invalid = |reason: &str| CoreError::InvalidAddress {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let (host, port) = s.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| invalid(&format!("bad port: {}", e)))?;

        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for PeerAddress {
    type Error = CoreError;

    fn try_from(value: String) -> CoreResult<Self> {
        value.parse()
    }
}

impl From<PeerAddress> for String {
    fn from(address: PeerAddress) -> Self {
        address.to_string()
    }
}

/// Peer identifier - globally unique id of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(u64);

impl PeerId {
    /// Create from raw value
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Derive the id of the peer advertising `address`
    ///
    /// IPv4 hosts pack their octets in base 1000 and add the port times
    /// 10^12. Any other host hashes `host:port` with blake3.
    #[must_use]
    pub fn from_address(address: &PeerAddress) -> Self {
        match address.host().parse::<Ipv4Addr>() {
            Ok(ip) => {
                let packed = ip
                    .octets()
                    .iter()
                    .fold(0u64, |acc, octet| acc * 1000 + u64::from(*octet));
                Self(packed + u64::from(address.port()) * PORT_FACTOR)
            }
            Err(_) => {
                let digest = blake3::hash(address.to_string().as_bytes());
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&digest.as_bytes()[..8]);
                // keep it positive for clients that read ids as signed
                Self(u64::from_le_bytes(bytes) >> 1)
            }
        }
    }

    /// Get raw value
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PeerId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
