//! A forward proxy speaking HTTP, SOCKS4/4a and SOCKS5 on both sides: it
//! accepts any of them from clients and can chain through an upstream proxy
//! of any of them, picked per destination host by a [`RouteTable`].

pub mod address;
pub mod common;
pub mod config;
pub mod error;
pub mod http;
pub mod proxy_url;
mod request;
mod response;

mod client;
mod dialer;
mod resolver;
mod router;
mod server;
mod tunnel;

pub use address::Address;
pub use client::{Client, Handshake};
pub use common::{read_message, Version};
pub use config::{Config, RouteEntry, ServerSpec};
pub use dialer::{Connection, Dialer, HttpHop, TcpDialer};
pub use error::{DecodeError, Error, Result};
pub use proxy_url::{Protocol, ProxyUrl};
pub use resolver::{Resolver, StaticResolver, SystemResolver};
pub use router::{Policy, RouteTable, Router};
pub use server::{Server, ServerProtocol};
pub use tunnel::Tunneler;

pub use nom;

pub mod v4 {
    pub use crate::common::{
        v4::{AddressType, Command},
        Version,
    };
    pub use crate::request::v4::Request;
    pub use crate::response::v4::{Response, Status};
}

pub mod v5 {
    pub use crate::common::{
        v5::{AddressType, AuthenticationMethod, Command},
        Version,
    };
    pub use crate::request::v5::{Hello, Request};
    pub use crate::response::v5::{Hello as HelloResponse, Response, Status};
}

/// Error bound every [`Wire`] decoder is generic over.
pub trait WireError<'i>:
    nom::error::ParseError<&'i [u8]>
    + nom::error::ContextError<&'i [u8]>
    + nom::error::FromExternalError<&'i [u8], Error>
{
}

impl<'i, E> WireError<'i> for E where
    E: nom::error::ParseError<&'i [u8]>
        + nom::error::ContextError<&'i [u8]>
        + nom::error::FromExternalError<&'i [u8], Error>
{
}

/// A control message with a fixed binary layout.
pub trait Wire: Sized {
    fn encode_into(&self, buffer: &mut Vec<u8>) -> Result<()>;
    fn decode<'i, E: WireError<'i>>(input: &'i [u8]) -> nom::IResult<&'i [u8], Self, E>;

    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.encode_into(&mut buffer)?;
        Ok(buffer)
    }

    /// Decodes one message from a complete buffer, returning it together with
    /// the number of bytes it occupied.
    fn from_bytes(input: &[u8]) -> Result<(Self, usize)> {
        match Self::decode::<DecodeError>(input) {
            Ok((rest, message)) => Ok((message, input.len() - rest.len())),
            Err(nom::Err::Incomplete(_)) => {
                Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into())
            }
            Err(nom::Err::Error(e) | nom::Err::Failure(e)) => Err(e.into()),
        }
    }
}
