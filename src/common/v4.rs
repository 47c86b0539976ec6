use std::net::{IpAddr, Ipv4Addr};

use nom::{combinator::map, error::context, number::streaming::be_u8};

use crate::{address::Address, error::Result, Wire, WireError};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Command {
    Connect,
    Bind,
    Unknown(u8),
}

impl From<u8> for Command {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Connect,
            2 => Self::Bind,
            v => Self::Unknown(v),
        }
    }
}

impl Command {
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Connect => 1,
            Self::Bind => 2,
            Self::Unknown(v) => *v,
        }
    }
}

impl Wire for Command {
    fn encode_into(&self, buffer: &mut Vec<u8>) -> Result<()> {
        buffer.push(self.as_u8());
        Ok(())
    }

    fn decode<'i, E: WireError<'i>>(buffer: &'i [u8]) -> nom::IResult<&'i [u8], Self, E> {
        context("Socks V4 command", map(be_u8, Self::from))(buffer)
    }
}

/// Destination as SOCKS4 can carry it: an IPv4 literal, or a name through the
/// SOCKS4a extension.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum AddressType {
    IPv4(Ipv4Addr),
    DomainName(String),
}

impl AddressType {
    /// `0.0.0.x` with `x != 0` tells the server a hostname follows the user id.
    pub(crate) const DOMAIN_MARKER: Ipv4Addr = Ipv4Addr::new(0, 0, 0, 1);

    pub(crate) fn is_domain_marker(ip: &Ipv4Addr) -> bool {
        let [a, b, c, d] = ip.octets();
        a == 0 && b == 0 && c == 0 && d != 0
    }
}

impl TryFrom<&Address> for AddressType {
    type Error = crate::error::Error;

    fn try_from(value: &Address) -> Result<Self> {
        match value.ip() {
            _ if value.is_unspecified() => Ok(Self::IPv4(Ipv4Addr::UNSPECIFIED)),
            Some(IpAddr::V4(ip4)) => Ok(Self::IPv4(ip4)),
            Some(IpAddr::V6(_)) => Err(super::unsupported("Socks v4 does not support IPv6")),
            None => Ok(Self::DomainName(value.host.clone())),
        }
    }
}

impl TryFrom<super::v5::AddressType> for AddressType {
    type Error = crate::error::Error;

    fn try_from(value: super::v5::AddressType) -> Result<Self> {
        match value {
            super::v5::AddressType::IPv4(ip4) => Ok(Self::IPv4(ip4)),
            super::v5::AddressType::DomainName(n) => Ok(Self::DomainName(n)),
            super::v5::AddressType::IPv6(_) => {
                Err(super::unsupported("Socks v4 does not support IPv6"))
            }
        }
    }
}

impl From<(AddressType, u16)> for Address {
    fn from((addr, port): (AddressType, u16)) -> Self {
        match addr {
            AddressType::IPv4(ip4) if ip4.is_unspecified() => Address::new("", port),
            AddressType::IPv4(ip4) => Address::new(ip4.to_string(), port),
            AddressType::DomainName(name) => Address::new(name, port),
        }
    }
}
