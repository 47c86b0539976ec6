pub mod v4 {
    use std::net::Ipv4Addr;

    use nom::{combinator::map, error::context, number::streaming::be_u16, sequence::tuple};

    use crate::{
        address::Address,
        common::{
            v4::{AddressType, Command},
            Version,
        },
        error::{failure, Error, Result},
        Wire, WireError,
    };

    /// Longest USERID or SOCKS4a hostname accepted, terminator excluded.
    pub const MAX_FIELD_LEN: usize = 255;

    /// SOCKS4 request, with the SOCKS4a hostname extension.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Request {
        pub command: Command,
        pub addr: AddressType,
        pub port: u16,
        pub user_id: String,
    }

    impl Request {
        pub fn connect(addr: AddressType, port: u16) -> Self {
            Self {
                command: Command::Connect,
                addr,
                port,
                user_id: String::new(),
            }
        }

        pub fn destination(&self) -> Address {
            (self.addr.clone(), self.port).into()
        }
    }

    /// A NUL terminated string of at most [`MAX_FIELD_LEN`] bytes.
    fn null_terminated<'i, E: WireError<'i>>(
        too_long: fn(usize) -> Error,
    ) -> impl Fn(&'i [u8]) -> nom::IResult<&'i [u8], String, E> {
        move |buffer: &'i [u8]| {
            let window = &buffer[..buffer.len().min(MAX_FIELD_LEN + 1)];
            match window.iter().position(|&b| b == 0) {
                Some(end) => Ok((
                    &buffer[end + 1..],
                    String::from_utf8_lossy(&buffer[..end]).into_owned(),
                )),
                None if window.len() > MAX_FIELD_LEN => {
                    Err(failure(buffer, too_long(window.len())))
                }
                None => Err(nom::Err::Incomplete(nom::Needed::new(1))),
            }
        }
    }

    fn user_id_too_long(_len: usize) -> Error {
        Error::Malformed(format!("user id longer than {MAX_FIELD_LEN} bytes"))
    }

    impl Wire for Request {
        fn encode_into(&self, buffer: &mut Vec<u8>) -> Result<()> {
            if self.user_id.len() > MAX_FIELD_LEN {
                return Err(user_id_too_long(self.user_id.len()));
            }
            if let AddressType::DomainName(ref name) = self.addr {
                if name.len() > MAX_FIELD_LEN {
                    return Err(Error::HostnameTooLong(name.len()));
                }
            }
            Version::Socks4.encode_into(buffer)?;
            self.command.encode_into(buffer)?;
            buffer.extend_from_slice(&self.port.to_be_bytes()[..]);
            match self.addr {
                AddressType::IPv4(ref ip4) => ip4.encode_into(buffer)?,
                AddressType::DomainName(_) => AddressType::DOMAIN_MARKER.encode_into(buffer)?,
            }
            buffer.extend_from_slice(self.user_id.as_bytes());
            buffer.push(0);
            if let AddressType::DomainName(ref name) = self.addr {
                buffer.extend_from_slice(name.as_bytes());
                buffer.push(0);
            }
            Ok(())
        }

        fn decode<'i, E: WireError<'i>>(buffer: &'i [u8]) -> nom::IResult<&'i [u8], Self, E> {
            let header: nom::IResult<_, _, E> = context(
                "Socks4 request",
                tuple((
                    Version::Socks4.tag(),
                    Command::decode,
                    be_u16,
                    Ipv4Addr::decode,
                    null_terminated(user_id_too_long),
                )),
            )(buffer);
            let (rest, (_, command, port, ip, user_id)) = header?;

            let (rest, addr) = if AddressType::is_domain_marker(&ip) {
                context(
                    "Socks4a domain name",
                    map(
                        null_terminated::<E>(Error::HostnameTooLong),
                        AddressType::DomainName,
                    ),
                )(rest)?
            } else {
                (rest, AddressType::IPv4(ip))
            };

            Ok((
                rest,
                Self {
                    command,
                    addr,
                    port,
                    user_id,
                },
            ))
        }
    }

}

pub mod v5 {
    use nom::{
        combinator::map,
        error::context,
        multi::length_count,
        number::streaming::{be_u16, be_u8},
        sequence::{preceded, tuple},
    };

    use crate::{
        address::Address,
        common::{
            reserved,
            v5::{AddressType, AuthenticationMethod, Command},
            Version,
        },
        error::{Error, Result},
        Wire, WireError,
    };

    /// Client greeting listing the authentication methods it offers.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Hello {
        pub methods: Vec<AuthenticationMethod>,
    }

    impl Wire for Hello {
        fn encode_into(&self, buffer: &mut Vec<u8>) -> Result<()> {
            let count: u8 = self
                .methods
                .len()
                .try_into()
                .map_err(|_| Error::TooManyMethods(self.methods.len()))?;
            Version::Socks5.encode_into(buffer)?;
            buffer.push(count);
            for m in &self.methods {
                m.encode_into(buffer)?;
            }
            Ok(())
        }

        fn decode<'i, E: WireError<'i>>(buffer: &'i [u8]) -> nom::IResult<&'i [u8], Self, E> {
            context(
                "Hello request",
                map(
                    preceded(
                        Version::Socks5.tag(),
                        length_count(be_u8, AuthenticationMethod::decode),
                    ),
                    |methods| Self { methods },
                ),
            )(buffer)
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Request {
        pub command: Command,
        pub addr: AddressType,
        pub port: u16,
    }

    impl Request {
        pub fn connect(addr: AddressType, port: u16) -> Self {
            Self {
                command: Command::Connect,
                addr,
                port,
            }
        }

        pub fn destination(&self) -> Address {
            (self.addr.clone(), self.port).into()
        }
    }

    impl Wire for Request {
        fn encode_into(&self, buffer: &mut Vec<u8>) -> Result<()> {
            Version::Socks5.encode_into(buffer)?;
            self.command.encode_into(buffer)?;
            buffer.push(0);
            self.addr.encode_into(buffer)?;
            buffer.extend_from_slice(&self.port.to_be_bytes()[..]);
            Ok(())
        }

        fn decode<'i, E: WireError<'i>>(buffer: &'i [u8]) -> nom::IResult<&'i [u8], Self, E> {
            context(
                "Socks request",
                map(
                    tuple((
                        Version::Socks5.tag(),
                        Command::decode,
                        reserved,
                        AddressType::decode,
                        be_u16,
                    )),
                    |(_, command, _, addr, port)| Self {
                        command,
                        addr,
                        port,
                    },
                ),
            )(buffer)
        }
    }

}
