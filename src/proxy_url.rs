use std::{fmt, str::FromStr};

use crate::{
    address::Address,
    config::{DEFAULT_HTTP_PORT, DEFAULT_SOCKS_PORT},
    error::Error,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    #[default]
    Direct,
    /// Version-agnostic SOCKS. Dials out like SOCKS5.
    Socks,
    Socks4,
    Socks4a,
    Socks5,
    Socks5h,
    Http,
}

impl Protocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Socks => "socks",
            Self::Socks4 => "socks4",
            Self::Socks4a => "socks4a",
            Self::Socks5 => "socks5",
            Self::Socks5h => "socks5h",
            Self::Http => "http",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Self::Direct => 0,
            Self::Http => DEFAULT_HTTP_PORT,
            _ => DEFAULT_SOCKS_PORT,
        }
    }

    /// Whether the far side, not this process, resolves destination names.
    pub fn resolves_remotely(&self) -> bool {
        matches!(self, Self::Socks4a | Self::Socks5h | Self::Http)
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "" | "direct" => Self::Direct,
            "socks" => Self::Socks,
            "socks4" => Self::Socks4,
            "socks4a" => Self::Socks4a,
            "socks5" => Self::Socks5,
            "socks5h" => Self::Socks5h,
            "http" => Self::Http,
            _ => return Err(Error::InvalidProxyUrl(s.to_owned())),
        })
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// An upstream proxy, e.g. `socks5h://127.0.0.1:9050`.
///
/// The default value is the "connect directly" proxy.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct ProxyUrl {
    pub protocol: Protocol,
    pub address: Address,
}

impl ProxyUrl {
    pub fn new(protocol: Protocol, address: Address) -> Self {
        Self { protocol, address }
    }

    pub fn direct() -> Self {
        Self::default()
    }

    pub fn is_direct(&self) -> bool {
        self.protocol == Protocol::Direct
    }
}

impl FromStr for ProxyUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidProxyUrl(s.to_owned());
        if s.is_empty() {
            return Ok(Self::direct());
        }

        let (scheme, rest) = s.split_once("://").ok_or_else(invalid)?;
        let protocol: Protocol = scheme.parse().map_err(|_| invalid())?;
        let rest = rest.trim_end_matches('/');
        if protocol == Protocol::Direct {
            return if rest.is_empty() {
                Ok(Self::direct())
            } else {
                Err(invalid())
            };
        }

        let address = Address::parse_with_default_port(rest, protocol.default_port())
            .map_err(|_| invalid())?;
        if address.is_unspecified() {
            return Err(invalid());
        }
        Ok(Self { protocol, address })
    }
}

impl fmt::Display for ProxyUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_direct() {
            f.write_str("direct://")
        } else {
            write!(f, "{}://{}", self.protocol, self.address)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ports() {
        let cases = [
            ("http://proxy", Protocol::Http, 80),
            ("socks://proxy", Protocol::Socks, 1080),
            ("socks4://proxy", Protocol::Socks4, 1080),
            ("socks4a://proxy", Protocol::Socks4a, 1080),
            ("socks5://proxy", Protocol::Socks5, 1080),
            ("SOCKS5H://proxy/", Protocol::Socks5h, 1080),
        ];
        for (text, protocol, port) in cases {
            let url: ProxyUrl = text.parse().unwrap();
            assert_eq!(url.protocol, protocol, "{text}");
            assert_eq!(url.address, Address::new("proxy", port), "{text}");
        }
    }

    #[test]
    fn explicit_port_and_ipv6() {
        let url: ProxyUrl = "socks5h://[::1]:9050".parse().unwrap();
        assert_eq!(url.address, Address::new("::1", 9050));
        assert_eq!(url.to_string(), "socks5h://[::1]:9050");
    }

    #[test]
    fn zero_value_is_direct() {
        assert!("".parse::<ProxyUrl>().unwrap().is_direct());
        assert!("direct://".parse::<ProxyUrl>().unwrap().is_direct());
        assert!(ProxyUrl::default().is_direct());
        assert_eq!(ProxyUrl::default().to_string(), "direct://");
    }

    #[test]
    fn rejects_garbage() {
        for text in ["proxy:1080", "ftp://proxy", "socks5://", "socks5://host:x", "direct://x"] {
            assert!(text.parse::<ProxyUrl>().is_err(), "{text} should not parse");
        }
    }
}
