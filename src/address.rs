use std::{
    fmt,
    net::{IpAddr, Ipv6Addr, SocketAddr},
    str::FromStr,
};

use crate::error::Error;

/// A destination: a hostname or IP literal plus a port.
///
/// An empty host is the "unspecified" address. IPv6 literals are stored
/// without brackets and bracketed only when formatted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn ip(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }

    pub fn is_unspecified(&self) -> bool {
        self.host.is_empty()
    }

    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.ip().map(|ip| SocketAddr::new(ip, self.port))
    }

    /// Parses `host:port`, falling back to `default_port` when the port is
    /// omitted.
    pub fn parse_with_default_port(s: &str, default_port: u16) -> Result<Self, Error> {
        let invalid = || Error::InvalidAddress(s.to_owned());

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, after) = rest.split_once(']').ok_or_else(invalid)?;
            host.parse::<Ipv6Addr>().map_err(|_| invalid())?;
            let port = match after {
                "" => None,
                p => Some(p.strip_prefix(':').ok_or_else(invalid)?),
            };
            (host, port)
        } else {
            match s.rsplit_once(':') {
                Some((host, _)) if host.contains(':') => return Err(invalid()),
                Some((host, port)) => (host, Some(port)),
                None => (s, None),
            }
        };

        let port = match port {
            Some(p) => p.parse().map_err(|_| invalid())?,
            None => default_port,
        };
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.parse::<Ipv6Addr>().is_ok() {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Address {
    type Err = Error;

    /// Parses `host:port`, `[v6]:port` or `:port`. The port is required.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let has_port = match s.strip_prefix('[') {
            Some(rest) => rest.contains("]:"),
            None => s.contains(':'),
        };
        if !has_port {
            return Err(Error::InvalidAddress(s.to_owned()));
        }
        Self::parse_with_default_port(s, 0)
    }
}

impl From<SocketAddr> for Address {
    fn from(value: SocketAddr) -> Self {
        Self::new(value.ip().to_string(), value.port())
    }
}

impl From<(IpAddr, u16)> for Address {
    fn from((ip, port): (IpAddr, u16)) -> Self {
        Self::new(ip.to_string(), port)
    }
}
