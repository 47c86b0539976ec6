use std::io;

use nom::error::{ContextError, ErrorKind, FromExternalError, ParseError};

use crate::{v4, v5};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid version tag {0:#04x}")]
    InvalidVersion(u8),
    #[error("invalid address type {0:#04x}")]
    InvalidAddrType(u8),
    #[error("non-zero reserved field {0:#04x}")]
    NonZeroReservedField(u8),
    #[error("hostname too long ({0} bytes)")]
    HostnameTooLong(usize),
    #[error("too many authentication methods ({0})")]
    TooManyMethods(usize),
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("unsupported command {0:#04x}")]
    UnsupportedCommand(u8),
    #[error("no acceptable authentication method")]
    NoAcceptableAuthMethod,

    #[error("socks4 proxy rejected the request: {0:?}")]
    Socks4Rejected(v4::Status),
    #[error("socks5 proxy rejected the request: {0:?}")]
    Socks5Rejected(v5::Status),
    #[error("http proxy rejected the request: {code} {reason}")]
    HttpRejected { code: u16, reason: String },

    #[error("malformed http message: {0}")]
    MalformedHttp(String),
    #[error("http head exceeds {0} bytes")]
    HeaderTooLarge(usize),

    #[error("invalid address {0:?}")]
    InvalidAddress(String),
    #[error("invalid proxy url {0:?}")]
    InvalidProxyUrl(String),
    #[error("invalid server protocol {0:?}")]
    InvalidServerProtocol(String),
    #[error("cannot resolve {host}: {reason}")]
    NameResolution { host: String, reason: String },
    #[error("timed out")]
    Timeout,
    #[error("cannot reach {destination}: {source}")]
    Unreachable {
        destination: crate::address::Address,
        source: Box<Error>,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// True when the error came from a chained proxy refusing the request, as
    /// opposed to a failure to reach anything at all.
    pub fn is_upstream_rejection(&self) -> bool {
        matches!(
            self,
            Self::Socks4Rejected(_) | Self::Socks5Rejected(_) | Self::HttpRejected { .. }
        )
    }

    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Self::Io(e) => Some(e.kind()),
            _ => None,
        }
    }
}

impl From<Error> for io::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::Io(e) => e,
            Error::Timeout => io::Error::new(io::ErrorKind::TimedOut, value),
            Error::UnsupportedCommand(_) | Error::NoAcceptableAuthMethod => {
                io::Error::new(io::ErrorKind::Unsupported, value)
            }
            e @ (Error::InvalidVersion(_)
            | Error::InvalidAddrType(_)
            | Error::NonZeroReservedField(_)
            | Error::Malformed(_)
            | Error::MalformedHttp(_)
            | Error::HeaderTooLarge(_)) => io::Error::new(io::ErrorKind::InvalidData, e),
            e => io::Error::new(io::ErrorKind::Other, e),
        }
    }
}

/// nom error type used by every decoder of the crate.
///
/// Decoders report protocol violations through [`FromExternalError`] so the
/// precise [`Error`] survives the parser stack; everything else is kept as the
/// nom kind plus the innermost context.
#[derive(Debug)]
pub struct DecodeError {
    cause: Option<Error>,
    kind: ErrorKind,
    context: Option<&'static str>,
}

impl<I> ParseError<I> for DecodeError {
    fn from_error_kind(_input: I, kind: ErrorKind) -> Self {
        Self {
            cause: None,
            kind,
            context: None,
        }
    }

    fn append(_input: I, _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

impl<I> ContextError<I> for DecodeError {
    fn add_context(_input: I, ctx: &'static str, mut other: Self) -> Self {
        other.context.get_or_insert(ctx);
        other
    }
}

impl<I> FromExternalError<I, Error> for DecodeError {
    fn from_external_error(_input: I, kind: ErrorKind, e: Error) -> Self {
        Self {
            cause: Some(e),
            kind,
            context: None,
        }
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        match value.cause {
            Some(e) => e,
            None => Error::Malformed(format!(
                "{} ({:?})",
                value.context.unwrap_or("message"),
                value.kind
            )),
        }
    }
}

/// Shorthand for a fatal decode failure carrying `e`.
pub(crate) fn failure<I, E>(input: I, e: Error) -> nom::Err<E>
where
    E: FromExternalError<I, Error>,
{
    nom::Err::Failure(E::from_external_error(input, ErrorKind::Verify, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_errors_become_invalid_data() {
        let e: io::Error = Error::InvalidVersion(7).into();
        assert_eq!(e.kind(), io::ErrorKind::InvalidData);
        assert_eq!(e.to_string(), "invalid version tag 0x07");
    }

    #[test]
    fn io_errors_pass_through() {
        let e: io::Error =
            Error::from(io::Error::from(io::ErrorKind::ConnectionRefused)).into();
        assert_eq!(e.kind(), io::ErrorKind::ConnectionRefused);
    }

    #[test]
    fn decode_error_keeps_context() {
        let e = DecodeError::add_context(
            &b""[..],
            "domain name",
            DecodeError::from_error_kind(&b""[..], ErrorKind::MapOpt),
        );
        assert!(matches!(Error::from(e), Error::Malformed(m) if m.starts_with("domain name")));
    }
}
