//! Peer endpoint labels.
//!
//! An [`Endpoint`] names one side of a connection (an IP address and a port).
//! The transport never interprets it beyond sending datagrams to the address;
//! collaborators use it to label and log connections.

use std::fmt;
use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::str::FromStr;

/// A UDP endpoint: IP address plus port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint(SocketAddr);

impl Endpoint {
    pub fn new(addr: SocketAddr) -> Self {
        Self(addr)
    }

    /// The socket address datagrams are sent to.
    pub fn addr(&self) -> SocketAddr {
        self.0
    }

    /// Network name, for collaborators that multiplex several transports.
    pub fn network(&self) -> &'static str {
        "udp"
    }

    pub fn ip(&self) -> IpAddr {
        self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl FromStr for Endpoint {
    type Err = AddrParseError;

    /// Parses `host:port`, with IPv6 hosts in brackets (`[::1]:9000`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<SocketAddr>().map(Self)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
