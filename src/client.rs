use std::{
    net::{IpAddr, Ipv4Addr},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::{
    address::Address,
    common::read_message,
    dialer::{Dialer, HttpHop},
    error::{Error, Result},
    http,
    proxy_url::{Protocol, ProxyUrl},
    resolver::{Resolver, SystemResolver},
    Wire,
};

/// Runs the client side of a proxy handshake over an already open stream.
pub struct Handshake<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream: S,
}

impl<S> Handshake<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    async fn send<T: Wire + std::fmt::Debug>(&mut self, message: &T) -> Result<()> {
        let buffer = message.to_bytes()?;
        log::trace!("Sending {message:?}");
        self.stream.write_all(&buffer[..]).await?;
        Ok(())
    }

    async fn receive<T: Wire + std::fmt::Debug>(&mut self) -> Result<T> {
        let mut buffer = Vec::new();
        let message = read_message(&mut self.stream, &mut buffer).await?;
        log::trace!("Received {message:?}");
        Ok(message)
    }

    /// SOCKS4 CONNECT. A [`DomainName`] address uses the SOCKS4a extension.
    ///
    /// [`DomainName`]: crate::v4::AddressType::DomainName
    pub async fn socks4(mut self, addr: crate::v4::AddressType, port: u16) -> Result<S> {
        use crate::v4::*;

        self.send(&Request::connect(addr, port)).await?;
        let response: Response = self.receive().await?;

        if response.status == Status::Success {
            Ok(self.stream)
        } else {
            Err(Error::Socks4Rejected(response.status))
        }
    }

    pub async fn socks5(mut self, addr: crate::v5::AddressType, port: u16) -> Result<S> {
        use crate::v5::*;

        self.send(&Hello {
            methods: vec![AuthenticationMethod::None],
        })
        .await?;
        let hello_response: HelloResponse = self.receive().await?;

        match hello_response.method {
            AuthenticationMethod::None => {}
            _ => return Err(Error::NoAcceptableAuthMethod),
        }

        self.send(&Request::connect(addr, port)).await?;
        let response: Response = self.receive().await?;

        if response.status == Status::Success {
            Ok(self.stream)
        } else {
            Err(Error::Socks5Rejected(response.status))
        }
    }

    pub async fn http_connect(mut self, destination: &Address) -> Result<S> {
        let request = http::connect_request(destination);
        log::trace!("Sending CONNECT {destination}");
        self.stream.write_all(&request).await?;

        let head = http::read_head_exact(&mut self.stream).await?;
        let response = http::ResponseHead::parse(&head)?;
        log::trace!("Received {} {}", response.code, response.reason);

        if response.code == 200 {
            Ok(self.stream)
        } else {
            Err(Error::HttpRejected {
                code: response.code,
                reason: response.reason,
            })
        }
    }
}

/// Reaches destinations through one upstream proxy, or directly when the
/// proxy URL is the zero value.
pub struct Client<D> {
    proxy: ProxyUrl,
    dialer: Arc<D>,
    resolver: Arc<dyn Resolver>,
}

impl<D> Clone for Client<D> {
    fn clone(&self) -> Self {
        Self {
            proxy: self.proxy.clone(),
            dialer: self.dialer.clone(),
            resolver: self.resolver.clone(),
        }
    }
}

impl<D: Dialer> Client<D> {
    pub fn new(proxy: ProxyUrl, dialer: Arc<D>) -> Self {
        Self::with_resolver(proxy, dialer, Arc::new(SystemResolver))
    }

    pub fn with_resolver(proxy: ProxyUrl, dialer: Arc<D>, resolver: Arc<dyn Resolver>) -> Self {
        Self {
            proxy,
            dialer,
            resolver,
        }
    }

    pub fn proxy(&self) -> &ProxyUrl {
        &self.proxy
    }

    async fn resolve(&self, destination: &Address, ipv4_only: bool) -> Result<IpAddr> {
        if let Some(ip) = destination.ip() {
            return Ok(ip);
        }
        if destination.is_unspecified() {
            return Ok(Ipv4Addr::UNSPECIFIED.into());
        }
        self.resolver
            .resolve(&destination.host)
            .await?
            .into_iter()
            .find(|ip| !ipv4_only || ip.is_ipv4())
            .ok_or_else(|| Error::NameResolution {
                host: destination.host.clone(),
                reason: if ipv4_only {
                    "no IPv4 address".to_owned()
                } else {
                    "no address".to_owned()
                },
            })
    }

    async fn handshake(&self, conn: D::Conn, destination: &Address) -> Result<D::Conn> {
        let port = destination.port;
        let handshake = Handshake::new(conn);
        match self.proxy.protocol {
            Protocol::Direct => Ok(handshake.stream),
            Protocol::Socks4 => {
                let ip = self.resolve(destination, true).await?;
                let addr = crate::v4::AddressType::try_from(&Address::from((ip, port)))?;
                handshake.socks4(addr, port).await
            }
            Protocol::Socks4a => {
                let addr = crate::v4::AddressType::try_from(destination)?;
                handshake.socks4(addr, port).await
            }
            Protocol::Socks | Protocol::Socks5 => {
                let ip = self.resolve(destination, false).await?;
                handshake.socks5(ip.into(), port).await
            }
            Protocol::Socks5h => handshake.socks5(destination.into(), port).await,
            Protocol::Http => handshake.http_connect(destination).await,
        }
    }
}

#[async_trait]
impl<D: Dialer> Dialer for Client<D> {
    type Conn = D::Conn;

    async fn dial(&self, destination: &Address) -> Result<D::Conn> {
        if self.proxy.is_direct() {
            return self.dialer.dial(destination).await;
        }

        let conn = self.dialer.dial(&self.proxy.address).await?;
        // on failure the proxy connection is dropped, and so closed, here
        self.handshake(conn, destination).await.map_err(|e| {
            log::debug!("handshake with {} for {destination} failed: {e}", self.proxy);
            e
        })
    }

    async fn dial_http(&self, destination: &Address) -> Result<(D::Conn, HttpHop)> {
        if self.proxy.protocol == Protocol::Http {
            let conn = self.dialer.dial(&self.proxy.address).await?;
            return Ok((conn, HttpHop::Proxy));
        }
        Ok((self.dial(destination).await?, HttpHop::Origin))
    }
}
