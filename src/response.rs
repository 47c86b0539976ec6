pub mod v4 {
    use std::net::Ipv4Addr;

    use nom::{
        combinator::map,
        error::context,
        number::streaming::{be_u16, be_u8},
        sequence::tuple,
    };

    use crate::{
        error::{failure, Error, Result},
        Wire, WireError,
    };

    /// Reply version byte. SOCKS4 replies carry 0, not 4.
    pub const REPLY_VERSION: u8 = 0;

    #[derive(Debug, PartialEq, Eq, Clone, Copy)]
    pub enum Status {
        Success,
        Rejected,
        InetdNotAccessible,
        InetdNotIdentified,
        Unassigned(u8),
    }

    impl From<u8> for Status {
        fn from(value: u8) -> Self {
            match value {
                0x5a => Self::Success,
                0x5b => Self::Rejected,
                0x5c => Self::InetdNotAccessible,
                0x5d => Self::InetdNotIdentified,
                v => Self::Unassigned(v),
            }
        }
    }

    impl Status {
        pub fn as_u8(&self) -> u8 {
            match self {
                Self::Success => 0x5a,
                Self::Rejected => 0x5b,
                Self::InetdNotAccessible => 0x5c,
                Self::InetdNotIdentified => 0x5d,
                Self::Unassigned(v) => *v,
            }
        }
    }

    impl Wire for Status {
        fn encode_into(&self, buffer: &mut Vec<u8>) -> Result<()> {
            buffer.push(self.as_u8());
            Ok(())
        }

        fn decode<'i, E: WireError<'i>>(buffer: &'i [u8]) -> nom::IResult<&'i [u8], Self, E> {
            context("status", map(be_u8, Self::from))(buffer)
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Response {
        pub status: Status,
        pub addr: Ipv4Addr,
        pub port: u16,
    }

    impl Response {
        /// A reply whose bind address is zeroed, which is all this proxy sends.
        pub fn new(status: Status) -> Self {
            Self {
                status,
                addr: Ipv4Addr::UNSPECIFIED,
                port: 0,
            }
        }
    }

    fn reply_version<'i, E: WireError<'i>>(buffer: &'i [u8]) -> nom::IResult<&'i [u8], (), E> {
        let (rest, v) = be_u8::<_, E>(buffer)?;
        if v == REPLY_VERSION {
            Ok((rest, ()))
        } else {
            Err(failure(buffer, Error::InvalidVersion(v)))
        }
    }

    impl Wire for Response {
        fn encode_into(&self, buffer: &mut Vec<u8>) -> Result<()> {
            buffer.push(REPLY_VERSION);
            self.status.encode_into(buffer)?;
            buffer.extend_from_slice(&self.port.to_be_bytes()[..]);
            self.addr.encode_into(buffer)
        }

        fn decode<'i, E: WireError<'i>>(buffer: &'i [u8]) -> nom::IResult<&'i [u8], Self, E> {
            context(
                "response",
                map(
                    tuple((reply_version, Status::decode, be_u16, Ipv4Addr::decode)),
                    |(_, status, port, addr)| Self { status, addr, port },
                ),
            )(buffer)
        }
    }

}

pub mod v5 {
    use nom::{
        combinator::map,
        error::context,
        number::streaming::{be_u16, be_u8},
        sequence::{preceded, tuple},
    };

    use crate::{
        common::{
            reserved,
            v5::{AddressType, AuthenticationMethod},
            Version,
        },
        error::Result,
        Wire, WireError,
    };

    /// Server's choice of authentication method.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Hello {
        pub method: AuthenticationMethod,
    }

    impl Wire for Hello {
        fn encode_into(&self, buffer: &mut Vec<u8>) -> Result<()> {
            Version::Socks5.encode_into(buffer)?;
            self.method.encode_into(buffer)
        }

        fn decode<'i, E: WireError<'i>>(buffer: &'i [u8]) -> nom::IResult<&'i [u8], Self, E> {
            context(
                "Hello response",
                map(
                    preceded(Version::Socks5.tag(), AuthenticationMethod::decode),
                    |method| Self { method },
                ),
            )(buffer)
        }
    }

    #[derive(Debug, PartialEq, Eq, Clone, Copy)]
    pub enum Status {
        Success,
        GeneralFailure,
        ConnectionNotAllowed,
        NetworkUnreachable,
        HostUnreachable,
        ConnectionRefused,
        TtlExpired,
        CommandNotSupported,
        AddressTypeNotSupported,
        Unassigned(u8),
    }

    impl From<u8> for Status {
        fn from(value: u8) -> Self {
            match value {
                0 => Self::Success,
                1 => Self::GeneralFailure,
                2 => Self::ConnectionNotAllowed,
                3 => Self::NetworkUnreachable,
                4 => Self::HostUnreachable,
                5 => Self::ConnectionRefused,
                6 => Self::TtlExpired,
                7 => Self::CommandNotSupported,
                8 => Self::AddressTypeNotSupported,
                v => Self::Unassigned(v),
            }
        }
    }

    impl Status {
        pub fn as_u8(&self) -> u8 {
            match self {
                Self::Success => 0,
                Self::GeneralFailure => 1,
                Self::ConnectionNotAllowed => 2,
                Self::NetworkUnreachable => 3,
                Self::HostUnreachable => 4,
                Self::ConnectionRefused => 5,
                Self::TtlExpired => 6,
                Self::CommandNotSupported => 7,
                Self::AddressTypeNotSupported => 8,
                Self::Unassigned(v) => *v,
            }
        }
    }

    impl Wire for Status {
        fn encode_into(&self, buffer: &mut Vec<u8>) -> Result<()> {
            buffer.push(self.as_u8());
            Ok(())
        }

        fn decode<'i, E: WireError<'i>>(buffer: &'i [u8]) -> nom::IResult<&'i [u8], Self, E> {
            context("Socks status", map(be_u8, Self::from))(buffer)
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Response {
        pub status: Status,
        pub addr: AddressType,
        pub port: u16,
    }

    impl Response {
        /// A reply whose bind address is zeroed, which is all this proxy sends.
        pub fn new(status: Status) -> Self {
            Self {
                status,
                addr: AddressType::UNSPECIFIED,
                port: 0,
            }
        }
    }

    impl Wire for Response {
        fn encode_into(&self, buffer: &mut Vec<u8>) -> Result<()> {
            Version::Socks5.encode_into(buffer)?;
            self.status.encode_into(buffer)?;
            buffer.push(0);
            self.addr.encode_into(buffer)?;
            buffer.extend_from_slice(&self.port.to_be_bytes()[..]);
            Ok(())
        }

        fn decode<'i, E: WireError<'i>>(buffer: &'i [u8]) -> nom::IResult<&'i [u8], Self, E> {
            context(
                "Socks response",
                map(
                    tuple((
                        Version::Socks5.tag(),
                        Status::decode,
                        reserved,
                        AddressType::decode,
                        be_u16,
                    )),
                    |(_, status, _, addr, port)| Self { status, addr, port },
                ),
            )(buffer)
        }
    }

    #[cfg(test)]
    mod tests {
        use proptest::prelude::*;

        use super::*;
        use crate::error::Error;

        fn v5_addr() -> impl Strategy<Value = AddressType> {
            prop_oneof![
                any::<[u8; 4]>().prop_map(|b| AddressType::IPv4(b.into())),
                any::<[u8; 16]>().prop_map(|b| AddressType::IPv6(b.into())),
                "[a-z0-9.-]{0,255}".prop_map(AddressType::DomainName),
            ]
        }

        proptest! {
            #[test]
            fn hello_round_trip(method in any::<u8>().prop_map(AuthenticationMethod::from)) {
                let hello = Hello { method };
                let bytes = hello.to_bytes().unwrap();
                prop_assert_eq!(Hello::from_bytes(&bytes).unwrap(), (hello, 2));
            }

            #[test]
            fn round_trip(
                status in any::<u8>().prop_map(Status::from),
                addr in v5_addr(),
                port in prop_oneof![Just(0u16), Just(u16::MAX), any::<u16>()],
            ) {
                let res = Response { status, addr, port };
                let bytes = res.to_bytes().unwrap();
                prop_assert_eq!(Response::from_bytes(&bytes).unwrap(), (res, bytes.len()));
            }
        }

        #[test]
        fn hello_layout() {
            let hello = Hello {
                method: AuthenticationMethod::NotAcceptable,
            };
            assert_eq!(hello.to_bytes().unwrap(), [5, 0xff]);
            assert_eq!(Hello::from_bytes(&[5, 0]).unwrap().0.method, AuthenticationMethod::None);
        }

        #[test]
        fn reply_layout() {
            let granted = Response::new(Status::Success);
            assert_eq!(granted.to_bytes().unwrap(), [5, 0, 0, 1, 0, 0, 0, 0, 0, 0]);
            let unreachable = Response {
                status: Status::HostUnreachable,
                addr: AddressType::IPv6(std::net::Ipv6Addr::LOCALHOST),
                port: 443,
            };
            let bytes = unreachable.to_bytes().unwrap();
            assert_eq!(bytes.len(), 22);
            assert_eq!(Response::from_bytes(&bytes).unwrap().0, unreachable);
        }

        #[test]
        fn reserved_must_be_zero() {
            assert!(matches!(
                Response::from_bytes(&[5, 0, 3, 1, 0, 0, 0, 0, 0, 0]),
                Err(Error::NonZeroReservedField(3))
            ));
        }

        #[test]
        fn status_codes() {
            for b in 0..=u8::MAX {
                assert_eq!(Status::from(b).as_u8(), b);
            }
        }
    }
}
