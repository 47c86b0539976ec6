use std::{io, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncWrite, DuplexStream},
    net::TcpStream,
};

use crate::{
    address::Address,
    error::{Error, Result},
};

/// A byte stream the proxy can relay.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Makes the next close send RST instead of FIN, so neither peer is left
    /// in a half-closed wait. Streams without such a notion ignore it.
    fn set_reset_on_close(&self) -> io::Result<()> {
        Ok(())
    }
}

impl Connection for TcpStream {
    fn set_reset_on_close(&self) -> io::Result<()> {
        socket2::SockRef::from(self).set_linger(Some(Duration::ZERO))
    }
}

impl Connection for DuplexStream {}

/// How a stream returned by [`Dialer::dial_http`] reaches the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpHop {
    /// Connected to the origin server; requests use origin-form targets.
    Origin,
    /// Connected to an HTTP proxy; requests use absolute-form targets.
    Proxy,
}

/// Opens byte streams to destinations.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    type Conn: Connection;

    async fn dial(&self, addr: &Address) -> Result<Self::Conn>;

    /// Opens a stream for relaying one plain HTTP request to `addr`.
    async fn dial_http(&self, addr: &Address) -> Result<(Self::Conn, HttpHop)> {
        Ok((self.dial(addr).await?, HttpHop::Origin))
    }
}

#[async_trait]
impl<D: Dialer> Dialer for Arc<D> {
    type Conn = D::Conn;

    async fn dial(&self, addr: &Address) -> Result<Self::Conn> {
        (**self).dial(addr).await
    }

    async fn dial_http(&self, addr: &Address) -> Result<(Self::Conn, HttpHop)> {
        (**self).dial_http(addr).await
    }
}

/// Plain TCP connect, bounded by an optional timeout.
#[derive(Debug, Clone, Default)]
pub struct TcpDialer {
    timeout: Option<Duration>,
}

impl TcpDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    type Conn = TcpStream;

    async fn dial(&self, addr: &Address) -> Result<TcpStream> {
        if addr.is_unspecified() {
            return Err(Error::InvalidAddress(addr.to_string()));
        }
        let connect = TcpStream::connect((addr.host.as_str(), addr.port));
        let stream = match self.timeout {
            Some(t) => tokio::time::timeout(t, connect)
                .await
                .map_err(|_| Error::Timeout)??,
            None => connect.await?,
        };
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}
