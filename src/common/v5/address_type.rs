use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
};

use nom::{
    combinator::{map, map_opt},
    error::context,
    multi::length_data,
    number::streaming::be_u8,
};

use crate::{
    address::Address,
    error::{failure, Error, Result},
    Wire, WireError,
};

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum AddressType {
    IPv4(Ipv4Addr),
    DomainName(String),
    IPv6(Ipv6Addr),
}

impl AddressType {
    pub const UNSPECIFIED: Self = Self::IPv4(Ipv4Addr::UNSPECIFIED);
}

impl Wire for AddressType {
    fn encode_into(&self, buffer: &mut Vec<u8>) -> Result<()> {
        match self {
            Self::IPv4(ref ip4) => {
                buffer.push(1);
                ip4.encode_into(buffer)
            }
            Self::IPv6(ref ip6) => {
                buffer.push(4);
                ip6.encode_into(buffer)
            }
            Self::DomainName(ref name) => {
                let size: u8 = name
                    .len()
                    .try_into()
                    .map_err(|_| Error::HostnameTooLong(name.len()))?;
                buffer.push(3);
                buffer.push(size);
                buffer.extend_from_slice(name.as_bytes());
                Ok(())
            }
        }
    }

    fn decode<'i, E: WireError<'i>>(buffer: &'i [u8]) -> nom::IResult<&'i [u8], Self, E> {
        let (rest, address_type) = context("address type", be_u8::<_, E>)(buffer)?;

        match address_type {
            1 => map(Ipv4Addr::decode, Self::IPv4)(rest),
            3 => context(
                "domain name",
                map_opt(length_data(be_u8), |b| {
                    std::str::from_utf8(b)
                        .ok()
                        .map(|s| Self::DomainName(s.to_owned()))
                }),
            )(rest),
            4 => map(Ipv6Addr::decode, Self::IPv6)(rest),
            t => Err(failure(buffer, Error::InvalidAddrType(t))),
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IPv4(ref ip4) => fmt::Display::fmt(ip4, f),
            Self::IPv6(ref ip6) => write!(f, "[{}]", ip6),
            Self::DomainName(ref name) => f.write_str(name),
        }
    }
}

impl From<IpAddr> for AddressType {
    fn from(value: IpAddr) -> Self {
        match value {
            IpAddr::V4(ip4) => Self::IPv4(ip4),
            IpAddr::V6(ip6) => Self::IPv6(ip6),
        }
    }
}

impl From<&Address> for AddressType {
    fn from(value: &Address) -> Self {
        match value.ip() {
            Some(ip) => ip.into(),
            None => Self::DomainName(value.host.clone()),
        }
    }
}

impl From<crate::v4::AddressType> for AddressType {
    fn from(value: crate::v4::AddressType) -> Self {
        match value {
            crate::v4::AddressType::IPv4(ip4) => Self::IPv4(ip4),
            crate::v4::AddressType::DomainName(n) => Self::DomainName(n),
        }
    }
}

impl From<(AddressType, u16)> for Address {
    fn from((addr, port): (AddressType, u16)) -> Self {
        match addr {
            AddressType::IPv4(ip4) => Address::new(ip4.to_string(), port),
            AddressType::IPv6(ip6) => Address::new(ip6.to_string(), port),
            AddressType::DomainName(name) => Address::new(name, port),
        }
    }
}
