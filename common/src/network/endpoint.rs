use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Address family selection (`-4`, `-6`, or whatever the resolver returns).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Family {
    V4,
    V6,
    #[default]
    Any,
}

impl Family {
    pub fn admits(&self, ip: &IpAddr) -> bool {
        match self {
            Family::V4 => ip.is_ipv4(),
            Family::V6 => ip.is_ipv6(),
            Family::Any => true,
        }
    }

    /// The wildcard address a listener of this family binds to.
    pub fn unspecified(&self) -> IpAddr {
        match self {
            Family::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            Family::V4 | Family::Any => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }

    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::V4 => write!(f, "inet"),
            Family::V6 => write!(f, "inet6"),
            Family::Any => write!(f, "any"),
        }
    }
}

/// A resolved (ip, port) candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub addr: SocketAddr,
}

impl Endpoint {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::new(ip, port),
        }
    }

    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn family(&self) -> Family {
        Family::of(&self.addr.ip())
    }

    /// Same address, different port. Used by the scanner to walk a range.
    pub fn with_port(&self, port: u16) -> Self {
        Self::new(self.ip(), port)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}
