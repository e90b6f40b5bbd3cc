//! A structured socket address decoupled from `std::net::SocketAddr`, so
//! a transport implementation never has to special-case `listen(Domain)`
//! for settings that only make sense for an already-resolved endpoint.

use std::fmt;
use std::net::SocketAddr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TransportSocketAddr(SocketAddr);

impl TransportSocketAddr {
    pub fn ip(&self) -> std::net::IpAddr {
        self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    pub fn as_std(&self) -> SocketAddr {
        self.0
    }
}

impl From<SocketAddr> for TransportSocketAddr {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl From<TransportSocketAddr> for SocketAddr {
    fn from(addr: TransportSocketAddr) -> Self {
        addr.0
    }
}

impl fmt::Display for TransportSocketAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
