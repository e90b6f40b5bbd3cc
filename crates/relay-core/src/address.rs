//! Address and destination types shared by routing, transport dialing and
//! protocol decoding: a small tagged enum plus a socket-addr-like
//! newtype, rather than a plain `SocketAddr`, so a domain name can be
//! carried all the way to the outbound dialer instead of being resolved
//! up front.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Maximum length of a domain address (RFC 1035).
pub const MAX_DOMAIN_LEN: usize = 253;

/// Tagged address variant. Total ordering is deliberately not
/// implemented; equality is structural.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Address {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Domain(String),
}

/// Error returned when a domain address exceeds [`MAX_DOMAIN_LEN`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DomainTooLong {
    pub len: usize,
}

impl fmt::Display for DomainTooLong {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "domain address is {} bytes, exceeds the {}-byte limit",
            self.len, MAX_DOMAIN_LEN
        )
    }
}

impl std::error::Error for DomainTooLong {}

impl Address {
    pub fn domain(name: impl Into<String>) -> Result<Self, DomainTooLong> {
        let name = name.into();
        if name.len() > MAX_DOMAIN_LEN {
            return Err(DomainTooLong { len: name.len() });
        }
        Ok(Address::Domain(name))
    }

    pub fn is_ip(&self) -> bool {
        !matches!(self, Address::Domain(_))
    }

    pub fn as_domain(&self) -> Option<&str> {
        match self {
            Address::Domain(d) => Some(d.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ipv4(v) => write!(f, "{v}"),
            Address::Ipv6(v) => write!(f, "{v}"),
            Address::Domain(d) => write!(f, "{d}"),
        }
    }
}

impl From<Ipv4Addr> for Address {
    fn from(v: Ipv4Addr) -> Self {
        Address::Ipv4(v)
    }
}

impl From<Ipv6Addr> for Address {
    fn from(v: Ipv6Addr) -> Self {
        Address::Ipv6(v)
    }
}

/// Transport-layer network kind a [`Destination`] targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Network {
    Tcp,
    Udp,
}

/// Error returned by [`Destination::new`] when `port == 0`: port 0 is
/// never a valid dial target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ZeroPort;

impl fmt::Display for ZeroPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port 0 is not a valid dial target")
    }
}

impl std::error::Error for ZeroPort {}

/// `(Network, Address, Port)` tuple identifying a dial target or an
/// inbound's original target.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Destination {
    network: Network,
    address: Address,
    port: u16,
}

impl Destination {
    pub fn new(network: Network, address: Address, port: u16) -> Result<Self, ZeroPort> {
        if port == 0 {
            return Err(ZeroPort);
        }
        Ok(Self {
            network,
            address,
            port,
        })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.address {
            Address::Ipv6(v) => write!(f, "[{v}]:{}", self.port),
            other => write!(f, "{other}:{}", self.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_port_rejected() {
        let err = Destination::new(Network::Tcp, Address::Ipv4(Ipv4Addr::LOCALHOST), 0);
        assert_eq!(err, Err(ZeroPort));
    }

    #[test]
    fn domain_over_limit_rejected() {
        let long = "a".repeat(MAX_DOMAIN_LEN + 1);
        assert!(Address::domain(long).is_err());
        let ok = "a".repeat(MAX_DOMAIN_LEN);
        assert!(Address::domain(ok).is_ok());
    }

    #[test]
    fn display_brackets_ipv6() {
        let dest = Destination::new(Network::Tcp, Address::Ipv6(Ipv6Addr::LOCALHOST), 443).unwrap();
        assert_eq!(dest.to_string(), "[::1]:443");
    }
}
