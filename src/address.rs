//! The stable identity key used for pool, connection, and handler maps.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A peer's `(host, port)`. Used verbatim as the key into the channel
/// pool map and the remote connection maps; two `Address`es that
/// compare equal are treated as the same peer even if DNS would
/// resolve them to different IPs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    host: String,
    port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Address {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InvalidAddress {
    #[error("missing port in address `{0}`")]
    MissingPort(String),
    #[error("invalid port in address `{0}`")]
    InvalidPort(String),
}

impl FromStr for Address {
    type Err = InvalidAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| InvalidAddress::MissingPort(s.to_string()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| InvalidAddress::InvalidPort(s.to_string()))?;
        Ok(Address::new(host, port))
    }
}
