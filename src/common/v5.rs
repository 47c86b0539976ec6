use nom::{combinator::map, error::context, number::streaming::be_u8};

use crate::{error::Result, Wire, WireError};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AuthenticationMethod {
    None,
    Gssapi,
    UsernamePassword,
    IanaAssigned(u8),
    PrivateMethod(u8),
    NotAcceptable,
}

impl From<u8> for AuthenticationMethod {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Gssapi,
            2 => Self::UsernamePassword,
            3..=0x7f => Self::IanaAssigned(value),
            0x80..=0xfe => Self::PrivateMethod(value),
            0xff => Self::NotAcceptable,
        }
    }
}

impl AuthenticationMethod {
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Gssapi => 1,
            Self::UsernamePassword => 2,
            Self::IanaAssigned(v) => *v,
            Self::PrivateMethod(v) => *v,
            Self::NotAcceptable => 0xff,
        }
    }
}

impl Wire for AuthenticationMethod {
    fn encode_into(&self, buffer: &mut Vec<u8>) -> Result<()> {
        buffer.push(self.as_u8());
        Ok(())
    }

    fn decode<'i, E: WireError<'i>>(buffer: &'i [u8]) -> nom::IResult<&'i [u8], Self, E> {
        context("Socks auth method", map(be_u8, Self::from))(buffer)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Command {
    Connect,
    Bind,
    UdpAssociate,
    Unknown(u8),
}

impl From<u8> for Command {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Connect,
            2 => Self::Bind,
            3 => Self::UdpAssociate,
            v => Self::Unknown(v),
        }
    }
}

impl Command {
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Connect => 1,
            Self::Bind => 2,
            Self::UdpAssociate => 3,
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
        context("Socks V5 command", map(be_u8, Self::from))(buffer)
    }
}

mod address_type;
pub use address_type::AddressType;
