use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr},
};

use nom::{bytes::streaming::take, combinator::map, error::context, number::streaming::be_u8};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{
    error::{failure, Error, Result},
    Wire, WireError,
};

#[repr(u8)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Version {
    Socks4 = 4,
    Socks5 = 5,
}

impl Version {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            4 => Some(Self::Socks4),
            5 => Some(Self::Socks5),
            _ => None,
        }
    }

    /// Parser accepting only this exact version tag.
    pub(crate) fn tag<'i, E: WireError<'i>>(
        self,
    ) -> impl FnMut(&'i [u8]) -> nom::IResult<&'i [u8], Self, E> {
        move |input| {
            let (rest, v) = be_u8::<_, E>(input)?;
            if v == self as u8 {
                Ok((rest, self))
            } else {
                Err(failure(input, Error::InvalidVersion(v)))
            }
        }
    }

    /// Reads exactly one byte off `stream` and identifies the SOCKS version.
    ///
    /// The byte is left in `buffer` so the full message decoder sees it again.
    pub async fn peek<S>(stream: &mut S, buffer: &mut Vec<u8>) -> Result<Self>
    where
        S: AsyncRead + Unpin,
    {
        let tag = stream.read_u8().await?;
        buffer.push(tag);
        Self::from_u8(tag).ok_or(Error::InvalidVersion(tag))
    }
}

impl Wire for Version {
    fn encode_into(&self, buffer: &mut Vec<u8>) -> Result<()> {
        buffer.push(*self as u8);
        Ok(())
    }

    fn decode<'i, E: WireError<'i>>(buffer: &'i [u8]) -> nom::IResult<&'i [u8], Self, E> {
        let (rest, v) = context("SocksVersion", be_u8::<_, E>)(buffer)?;
        match Self::from_u8(v) {
            Some(version) => Ok((rest, version)),
            None => Err(failure(buffer, Error::InvalidVersion(v))),
        }
    }
}

impl Wire for Ipv4Addr {
    fn encode_into(&self, buffer: &mut Vec<u8>) -> Result<()> {
        buffer.extend_from_slice(&self.octets());
        Ok(())
    }

    fn decode<'i, E: WireError<'i>>(buffer: &'i [u8]) -> nom::IResult<&'i [u8], Self, E> {
        map(take(4usize), |b: &[u8]| {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(b);
            Ipv4Addr::from(octets)
        })(buffer)
    }
}

impl Wire for Ipv6Addr {
    fn encode_into(&self, buffer: &mut Vec<u8>) -> Result<()> {
        buffer.extend_from_slice(&self.octets());
        Ok(())
    }

    fn decode<'i, E: WireError<'i>>(buffer: &'i [u8]) -> nom::IResult<&'i [u8], Self, E> {
        map(take(16usize), |b: &[u8]| {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(b);
            Ipv6Addr::from(octets)
        })(buffer)
    }
}

/// Reads one complete `T` off `stream`, pulling exactly as many bytes as the
/// decoder asks for so nothing past the message is consumed.
///
/// `buffer` may already hold a prefix of the message (see [`Version::peek`]).
pub async fn read_message<T, S>(stream: &mut S, buffer: &mut Vec<u8>) -> Result<T>
where
    T: Wire,
    S: AsyncRead + Unpin,
{
    loop {
        let needed = match T::decode::<crate::error::DecodeError>(&buffer[..]) {
            Ok((rest, message)) => {
                let used = buffer.len() - rest.len();
                buffer.drain(..used);
                return Ok(message);
            }
            Err(nom::Err::Incomplete(nom::Needed::Size(n))) => n.get(),
            Err(nom::Err::Incomplete(nom::Needed::Unknown)) => 1,
            Err(nom::Err::Error(e) | nom::Err::Failure(e)) => return Err(e.into()),
        };

        let start = buffer.len();
        buffer.resize(start + needed, 0);
        if let Err(e) = stream.read_exact(&mut buffer[start..]).await {
            buffer.truncate(start);
            return Err(e.into());
        }
    }
}

/// The SOCKS5 `RSV` byte, which must be zero.
pub(crate) fn reserved<'i, E: WireError<'i>>(input: &'i [u8]) -> nom::IResult<&'i [u8], (), E> {
    let (rest, b) = be_u8::<_, E>(input)?;
    if b == 0 {
        Ok((rest, ()))
    } else {
        Err(failure(input, Error::NonZeroReservedField(b)))
    }
}

pub(crate) fn unsupported(msg: &'static str) -> Error {
    io::Error::new(io::ErrorKind::Unsupported, msg).into()
}

pub mod v4;
pub mod v5;
