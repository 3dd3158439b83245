//! Address and network types for outbound connections

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};

/// Network type for listeners and dials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Network {
    #[default]
    Tcp,
    Udp,
}

impl Network {
    /// Parse a config network field. Anything that is not `"udp"`
    /// (case-insensitive) means TCP.
    pub fn from_config(s: &str) -> Self {
        if s.eq_ignore_ascii_case("udp") {
            Network::Udp
        } else {
            Network::Tcp
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Tcp => write!(f, "tcp"),
            Network::Udp => write!(f, "udp"),
        }
    }
}

impl Serialize for Network {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Network {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Network::from_config(&s))
    }
}

/// Network address representation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// IP socket address (IP + port)
    Socket(SocketAddr),
    /// Domain name with port
    Domain(String, u16),
}

impl Address {
    /// Create an unspecified address (0.0.0.0:0)
    pub fn unspecified() -> Self {
        Address::Socket(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0))
    }

    /// Create from domain and port
    pub fn domain(domain: impl Into<String>, port: u16) -> Self {
        Address::Domain(domain.into(), port)
    }

    /// Create from IP and port
    pub fn ip_port(ip: IpAddr, port: u16) -> Self {
        Address::Socket(SocketAddr::new(ip, port))
    }

    /// Parse a `"host:port"` string. The host may be an IP literal or a
    /// domain name; the port must parse as u16.
    pub fn parse_host_port(s: &str) -> Option<Self> {
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Some(Address::Socket(addr));
        }
        let (host, port) = s.rsplit_once(':')?;
        let port: u16 = port.parse().ok()?;
        if let Ok(ip) = host.parse::<IpAddr>() {
            Some(Address::Socket(SocketAddr::new(ip, port)))
        } else {
            Some(Address::Domain(host.to_string(), port))
        }
    }

    /// Get the port
    pub fn port(&self) -> u16 {
        match self {
            Address::Socket(addr) => addr.port(),
            Address::Domain(_, port) => *port,
        }
    }

    /// Get the IP part, if this is a socket address
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            Address::Socket(addr) => Some(addr.ip()),
            Address::Domain(_, _) => None,
        }
    }

    /// Try to get as socket address (fails for domain)
    pub fn as_socket(&self) -> Option<SocketAddr> {
        match self {
            Address::Socket(addr) => Some(*addr),
            Address::Domain(_, _) => None,
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Address::Socket(addr) => write!(f, "{}", addr),
            Address::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::Socket(addr)
    }
}

impl From<(&str, u16)> for Address {
    fn from((domain, port): (&str, u16)) -> Self {
        Address::Domain(domain.to_string(), port)
    }
}
