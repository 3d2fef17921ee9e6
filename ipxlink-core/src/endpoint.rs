#![forbid(unsafe_code)]

//! Network endpoint of an IPX tunnel peer.

use std::{
    fmt,
    net::{Ipv4Addr, SocketAddrV4},
};

use crate::{IpxError, IpxResult};

/// Default UDP port of the DOSBox IPX tunnel.
pub const DEFAULT_PORT: u16 = 19900;

/// IPv4 address plus a non-zero UDP port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    address: Ipv4Addr,
    port: u16,
}

impl Endpoint {
    /// Build an endpoint, rejecting port 0.
    pub fn new(address: Ipv4Addr, port: u16) -> IpxResult<Self> {
        if port == 0 {
            return Err(IpxError::InvalidEndpoint(format!("{address}:0 has no port")));
        }
        Ok(Self { address, port })
    }

    #[must_use]
    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Same address, different port.
    pub fn with_port(self, port: u16) -> IpxResult<Self> {
        Self::new(self.address, port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

impl From<Endpoint> for SocketAddrV4 {
    fn from(ep: Endpoint) -> Self {
        SocketAddrV4::new(ep.address, ep.port)
    }
}

impl TryFrom<SocketAddrV4> for Endpoint {
    type Error = IpxError;

    fn try_from(addr: SocketAddrV4) -> IpxResult<Self> {
        Self::new(*addr.ip(), addr.port())
    }
}
