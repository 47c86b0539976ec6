use std::{fmt, io, str::FromStr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    address::Address,
    config::{Config, DEFAULT_IO_TIMEOUT},
    dialer::{Connection, Dialer, HttpHop},
    error::{Error, Result},
    http::{self, RequestHead, ResponseHead, BAD_GATEWAY, CONNECTION_ESTABLISHED},
    read_message,
    router::Router,
    tunnel::Tunneler,
    Version, Wire,
};

/// Inbound protocol a listener speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerProtocol {
    Http,
    Socks4,
    Socks5,
    /// SOCKS4 or SOCKS5, told apart by the first byte.
    Socks,
}

impl ServerProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Socks4 => "socks4",
            Self::Socks5 => "socks5",
            Self::Socks => "socks",
        }
    }
}

impl FromStr for ServerProtocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "socks4" => Ok(Self::Socks4),
            "socks5" => Ok(Self::Socks5),
            "socks" => Ok(Self::Socks),
            _ => Err(Error::InvalidServerProtocol(s.to_owned())),
        }
    }
}

impl fmt::Display for ServerProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the handshake phase: an outbound connection the client has
/// been told about.
enum Accepted<R> {
    Tunnel(R),
    Forward {
        remote: R,
        request: RequestHead,
        hop: HttpHop,
        leftover: Vec<u8>,
    },
}

/// Accepts proxy clients and connects them through `outbound`.
pub struct Server<D> {
    protocol: ServerProtocol,
    outbound: Arc<D>,
    tunneler: Tunneler,
    io_timeout: Duration,
}

impl<D> Clone for Server<D> {
    fn clone(&self) -> Self {
        Self {
            protocol: self.protocol,
            outbound: self.outbound.clone(),
            tunneler: self.tunneler,
            io_timeout: self.io_timeout,
        }
    }
}

impl<D: Dialer> Server<Router<D>> {
    /// Server for `config`, routing every destination through `dialer`
    /// according to the configured routes.
    pub fn from_config(config: &Config, dialer: D) -> Self {
        let router = Router::new(config.route_table(), Arc::new(dialer));
        Self::new(config.server.protocol, router)
            .with_io_timeout(config.io_timeout)
            .with_tunneler(Tunneler::new(config.buffer_size))
    }
}

impl<D: Dialer> Server<D> {
    pub fn new(protocol: ServerProtocol, outbound: D) -> Self {
        Self {
            protocol,
            outbound: Arc::new(outbound),
            tunneler: Tunneler::default(),
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    /// Bounds everything from the first byte read to the success reply.
    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn with_tunneler(mut self, tunneler: Tunneler) -> Self {
        self.tunneler = tunneler;
        self
    }

    pub fn protocol(&self) -> ServerProtocol {
        self.protocol
    }

    /// Binds a listener on `listen`.
    pub async fn bind(listen: &Address) -> Result<TcpListener> {
        Ok(TcpListener::bind((listen.host.as_str(), listen.port)).await?)
    }

    /// Accepts connections until `shutdown` fires, then stops accepting and
    /// waits for every open connection to finish.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let tracker = TaskTracker::new();
        log::info!("Serving {} on {}", self.protocol, listener.local_addr()?);

        let result = loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => None,
                accepted = listener.accept() => Some(accepted),
            };
            let (stream, peer) = match accepted {
                None => break Ok(()),
                Some(Ok(accepted)) => accepted,
                Some(Err(e)) => {
                    log::error!("accept failed: {e}");
                    break Err(e.into());
                }
            };

            log::info!("New connection from {peer}");
            let server = self.clone();
            tracker.spawn(async move {
                match server.handle(stream).await {
                    Ok(()) => log::info!("Connection from {peer} closed"),
                    Err(e) => log::error!("Issue with client {peer}: {e}"),
                }
            });
        };

        drop(listener);
        tracker.close();
        if !tracker.is_empty() {
            log::info!("Waiting for {} connection(s) to finish", tracker.len());
        }
        tracker.wait().await;
        result
    }

    /// Runs one client connection to completion.
    pub async fn handle<C: Connection>(&self, mut client: C) -> Result<()> {
        let accepted = tokio::time::timeout(self.io_timeout, self.accept(&mut client))
            .await
            .map_err(|_| Error::Timeout)??;

        let result = match accepted {
            Accepted::Tunnel(mut remote) => {
                let result = self.tunneler.tunnel(&mut client, &mut remote).await;
                drop(remote);
                result.map_err(Error::from)
            }
            Accepted::Forward {
                mut remote,
                request,
                hop,
                leftover,
            } => {
                let result = forward(&mut client, &mut remote, &request, hop, &leftover).await;
                drop(remote);
                result
            }
        };
        drop(client);
        result
    }

    async fn accept<C: Connection>(&self, client: &mut C) -> Result<Accepted<D::Conn>> {
        let mut buffer = Vec::with_capacity(512);
        match self.protocol {
            ServerProtocol::Http => self.accept_http(client).await,
            ServerProtocol::Socks4 => self.accept_socks4(client, buffer).await,
            ServerProtocol::Socks5 => self.accept_socks5(client, buffer).await,
            ServerProtocol::Socks => match Version::peek(client, &mut buffer).await? {
                Version::Socks4 => self.accept_socks4(client, buffer).await,
                Version::Socks5 => self.accept_socks5(client, buffer).await,
            },
        }
    }

    async fn accept_socks4<C: Connection>(
        &self,
        client: &mut C,
        mut buffer: Vec<u8>,
    ) -> Result<Accepted<D::Conn>> {
        use crate::v4::*;

        let request: Request = read_message(client, &mut buffer).await?;
        log::trace!("Received {request:?}");
        if request.command != Command::Connect {
            send(client, &Response::new(Status::Rejected)).await?;
            return Err(Error::UnsupportedCommand(request.command.as_u8()));
        }

        let destination = request.destination();
        match self.outbound.dial(&destination).await {
            Ok(remote) => {
                send(client, &Response::new(Status::Success)).await?;
                Ok(Accepted::Tunnel(remote))
            }
            Err(e) => {
                reject(client, &Response::new(Status::Rejected)).await;
                Err(unreachable(destination, e))
            }
        }
    }

    async fn accept_socks5<C: Connection>(
        &self,
        client: &mut C,
        mut buffer: Vec<u8>,
    ) -> Result<Accepted<D::Conn>> {
        use crate::v5::*;

        let hello: Hello = read_message(client, &mut buffer).await?;
        log::trace!("Received {hello:?}");
        let method = if hello.methods.contains(&AuthenticationMethod::None) {
            AuthenticationMethod::None
        } else {
            AuthenticationMethod::NotAcceptable
        };
        send(client, &HelloResponse { method }).await?;
        if method == AuthenticationMethod::NotAcceptable {
            return Err(Error::NoAcceptableAuthMethod);
        }

        let request: Request = read_message(client, &mut buffer).await?;
        log::trace!("Received {request:?}");
        if request.command != Command::Connect {
            send(client, &Response::new(Status::CommandNotSupported)).await?;
            return Err(Error::UnsupportedCommand(request.command.as_u8()));
        }

        let destination = request.destination();
        match self.outbound.dial(&destination).await {
            Ok(remote) => {
                send(client, &Response::new(Status::Success)).await?;
                Ok(Accepted::Tunnel(remote))
            }
            Err(e) => {
                reject(client, &Response::new(socks5_failure(&e))).await;
                Err(unreachable(destination, e))
            }
        }
    }

    async fn accept_http<C: Connection>(&self, client: &mut C) -> Result<Accepted<D::Conn>> {
        let mut buffer = Vec::with_capacity(4096);
        let head_len = http::read_head(client, &mut buffer).await?;
        let request = RequestHead::parse(&buffer[..head_len])?;
        let leftover = buffer.split_off(head_len);
        let destination = request.destination()?;
        log::debug!("{} {} ({destination})", request.method, request.target);

        if request.is_connect() {
            match self.outbound.dial(&destination).await {
                Ok(mut remote) => {
                    client.write_all(CONNECTION_ESTABLISHED).await?;
                    if !leftover.is_empty() {
                        remote.write_all(&leftover).await?;
                    }
                    Ok(Accepted::Tunnel(remote))
                }
                Err(e) => {
                    reject_http(client).await;
                    Err(unreachable(destination, e))
                }
            }
        } else {
            match self.outbound.dial_http(&destination).await {
                Ok((remote, hop)) => Ok(Accepted::Forward {
                    remote,
                    request,
                    hop,
                    leftover,
                }),
                Err(e) => {
                    reject_http(client).await;
                    Err(unreachable(destination, e))
                }
            }
        }
    }
}

async fn send<C, T>(client: &mut C, message: &T) -> Result<()>
where
    C: Connection,
    T: Wire + fmt::Debug,
{
    log::trace!("Sending {message:?}");
    client.write_all(&message.to_bytes()?).await?;
    Ok(())
}

/// Best effort negative reply; the dial error is what gets reported.
async fn reject<C, T>(client: &mut C, message: &T)
where
    C: Connection,
    T: Wire + fmt::Debug,
{
    if let Err(e) = send(client, message).await {
        log::debug!("cannot send rejection: {e}");
    }
}

async fn reject_http<C: Connection>(client: &mut C) {
    if let Err(e) = client.write_all(BAD_GATEWAY).await {
        log::debug!("cannot send rejection: {e}");
    }
}

fn unreachable(destination: Address, e: Error) -> Error {
    Error::Unreachable {
        destination,
        source: Box::new(e),
    }
}

fn socks5_failure(e: &Error) -> crate::v5::Status {
    use crate::v5::Status;

    if e.is_upstream_rejection() {
        Status::GeneralFailure
    } else if e.io_kind() == Some(io::ErrorKind::ConnectionRefused) {
        Status::ConnectionRefused
    } else {
        Status::HostUnreachable
    }
}

/// One request/response exchange with framing preserved on both sides.
async fn forward<C, R>(
    client: &mut C,
    remote: &mut R,
    request: &RequestHead,
    hop: HttpHop,
    leftover: &[u8],
) -> Result<()>
where
    C: Connection,
    R: Connection,
{
    let request_framing = request.body_framing()?;
    remote.write_all(&request.encode(hop)?).await?;
    {
        let mut body = BufReader::new(leftover.chain(&mut *client));
        http::relay_body(&mut body, remote, request_framing).await?;
    }
    remote.flush().await?;

    // interim 1xx heads are relayed as they come, the final one follows
    let mut buffer = Vec::with_capacity(4096);
    let (head_len, response) = loop {
        let head_len = http::read_head(remote, &mut buffer).await?;
        let response = ResponseHead::parse(&buffer[..head_len])?;
        if !response.is_interim() {
            break (head_len, response);
        }
        log::debug!("{} {} -> {} (interim)", request.method, request.target, response.code);
        client.write_all(&buffer[..head_len]).await?;
        buffer.drain(..head_len);
    };
    log::info!("{} {} -> {}", request.method, request.target, response.code);
    let response_framing = response.body_framing(&request.method)?;

    client.write_all(&buffer[..head_len]).await?;
    let mut body = BufReader::new((&buffer[head_len..]).chain(&mut *remote));
    http::relay_body(&mut body, client, response_framing).await?;
    client.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream},
        sync::mpsc::UnboundedReceiver,
        task::JoinHandle,
    };

    use super::*;
    use crate::dialer::testing::PipeDialer;

    type Dials = UnboundedReceiver<(Address, DuplexStream)>;

    fn spawn(protocol: ServerProtocol) -> (DuplexStream, Dials, JoinHandle<Result<()>>) {
        let (dialer, rx) = PipeDialer::new();
        let server = Server::new(protocol, dialer).with_io_timeout(Duration::from_secs(5));
        let (client, inbound) = duplex(64 * 1024);
        let handle = tokio::spawn(async move { server.handle(inbound).await });
        (client, rx, handle)
    }

    /// Same as [`spawn`] with every dial refused.
    fn spawn_refusing(protocol: ServerProtocol) -> (DuplexStream, JoinHandle<Result<()>>) {
        let (client, rx, handle) = spawn(protocol);
        drop(rx);
        (client, handle)
    }

    #[test]
    fn protocol_names() {
        for p in [
            ServerProtocol::Http,
            ServerProtocol::Socks4,
            ServerProtocol::Socks5,
            ServerProtocol::Socks,
        ] {
            assert_eq!(p.to_string().parse::<ServerProtocol>().unwrap(), p);
        }
        assert_eq!("SOCKS5".parse::<ServerProtocol>().unwrap(), ServerProtocol::Socks5);
        assert!(matches!(
            "socks6".parse::<ServerProtocol>(),
            Err(Error::InvalidServerProtocol(_))
        ));
    }

    #[tokio::test]
    async fn socks4a_connect() {
        let (mut client, mut rx, handle) = spawn(ServerProtocol::Socks);
        client
            .write_all(b"\x04\x01\x01\xbb\x00\x00\x00\x01user\x00example.com\x00")
            .await
            .unwrap();

        let (addr, mut far) = rx.recv().await.unwrap();
        assert_eq!(addr, Address::new("example.com", 443));

        let mut reply = [0u8; 8];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0, 0x5a, 0, 0, 0, 0, 0, 0]);

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        drop(client);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn socks5_connect() {
        let (mut client, mut rx, handle) = spawn(ServerProtocol::Socks5);
        client.write_all(&[5, 2, 0x02, 0x00]).await.unwrap();
        let mut hello = [0u8; 2];
        client.read_exact(&mut hello).await.unwrap();
        assert_eq!(hello, [5, 0]);

        client
            .write_all(&[5, 1, 0, 1, 10, 0, 0, 1, 0x1f, 0x90])
            .await
            .unwrap();
        let (addr, mut far) = rx.recv().await.unwrap();
        assert_eq!(addr, Address::new("10.0.0.1", 8080));

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [5, 0, 0, 1, 0, 0, 0, 0, 0, 0]);

        far.write_all(b"pong").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        drop(far);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn socks5_without_acceptable_method() {
        let (mut client, mut rx, handle) = spawn(ServerProtocol::Socks);
        client.write_all(&[5, 1, 0xf0]).await.unwrap();

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, [5, 0xff]);
        assert!(matches!(
            handle.await.unwrap(),
            Err(Error::NoAcceptableAuthMethod)
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn bind_is_refused() {
        let (mut client, mut rx, handle) = spawn(ServerProtocol::Socks4);
        client
            .write_all(b"\x04\x02\x00\x50\x7f\x00\x00\x01\x00")
            .await
            .unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply[..2], [0, 0x5b]);
        assert!(matches!(
            handle.await.unwrap(),
            Err(Error::UnsupportedCommand(2))
        ));
        assert!(rx.try_recv().is_err());

        let (mut client, mut rx, handle) = spawn(ServerProtocol::Socks5);
        client.write_all(&[5, 1, 0]).await.unwrap();
        client
            .write_all(&[5, 2, 0, 1, 127, 0, 0, 1, 0, 80])
            .await
            .unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply[..4], [5, 0, 5, 7]);
        assert!(handle.await.unwrap().is_err());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn framing_errors_get_no_reply() {
        let (mut client, _rx, handle) = spawn(ServerProtocol::Socks);
        client.write_all(&[6, 1, 0]).await.unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert!(reply.is_empty());
        assert!(matches!(handle.await.unwrap(), Err(Error::InvalidVersion(6))));

        let (mut client, _rx, handle) = spawn(ServerProtocol::Socks5);
        client.write_all(&[5, 1, 0]).await.unwrap();
        client
            .write_all(&[5, 1, 1, 1, 127, 0, 0, 1, 0, 80])
            .await
            .unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, [5, 0]);
        assert!(matches!(
            handle.await.unwrap(),
            Err(Error::NonZeroReservedField(1))
        ));
    }

    #[tokio::test]
    async fn dial_failures_are_reported() {
        let (mut client, handle) = spawn_refusing(ServerProtocol::Socks5);
        client.write_all(&[5, 1, 0]).await.unwrap();
        client
            .write_all(&[5, 1, 0, 3, 4, b'h', b'o', b's', b't', 0, 80])
            .await
            .unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply[..4], [5, 0, 5, 5]);
        match handle.await.unwrap() {
            Err(e @ Error::Unreachable { .. }) => {
                assert!(e.to_string().starts_with("cannot reach host:80"))
            }
            other => panic!("{other:?}"),
        }

        let (mut client, handle) = spawn_refusing(ServerProtocol::Socks4);
        client
            .write_all(b"\x04\x01\x00\x50\x7f\x00\x00\x01\x00")
            .await
            .unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply[..2], [0, 0x5b]);
        assert!(handle.await.unwrap().is_err());

        let (mut client, handle) = spawn_refusing(ServerProtocol::Http);
        client
            .write_all(b"CONNECT nowhere.example:443 HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, BAD_GATEWAY);
        assert!(handle.await.unwrap().is_err());
    }

    #[test]
    fn socks5_failure_status() {
        use crate::v5::Status;

        let refused = Error::from(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert_eq!(socks5_failure(&refused), Status::ConnectionRefused);
        assert_eq!(
            socks5_failure(&Error::Socks4Rejected(crate::v4::Status::Rejected)),
            Status::GeneralFailure
        );
        assert_eq!(socks5_failure(&Error::Timeout), Status::HostUnreachable);
    }

    #[tokio::test]
    async fn http_connect_forwards_early_payload() {
        let (mut client, mut rx, handle) = spawn(ServerProtocol::Http);
        client
            .write_all(b"CONNECT example.com:8443 HTTP/1.1\r\nHost: example.com:8443\r\n\r\nearly")
            .await
            .unwrap();
        let (addr, mut far) = rx.recv().await.unwrap();
        assert_eq!(addr, Address::new("example.com", 8443));

        let mut reply = vec![0u8; CONNECTION_ESTABLISHED.len()];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, CONNECTION_ESTABLISHED);

        let mut buf = [0u8; 5];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"early");

        drop(client);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn http_forward_exchange() {
        let (mut client, mut rx, handle) = spawn(ServerProtocol::Http);
        client
            .write_all(b"POST http://example.com/submit HTTP/1.1\r\nHost: example.com\r\nContent-Length: 5\r\n\r\nhello")
            .await
            .unwrap();

        let (addr, mut far) = rx.recv().await.unwrap();
        assert_eq!(addr, Address::new("example.com", 80));

        let expected = b"POST /submit HTTP/1.1\r\nHost: example.com\r\nContent-Length: 5\r\n\r\nhello";
        let mut request = vec![0u8; expected.len()];
        far.read_exact(&mut request).await.unwrap();
        assert_eq!(request, expected);

        let response =
            b"HTTP/1.1 201 Created\r\nTransfer-Encoding: chunked\r\nX-Id: 7\r\n\r\n3\r\nabc\r\n0\r\n\r\n";
        far.write_all(response).await.unwrap();

        let mut relayed = vec![0u8; response.len()];
        client.read_exact(&mut relayed).await.unwrap();
        assert_eq!(relayed, response);

        handle.await.unwrap().unwrap();
        // remote closed first, then the client
        let mut rest = Vec::new();
        far.read_to_end(&mut rest).await.unwrap();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn http_forward_relays_interim_responses() {
        let (mut client, mut rx, handle) = spawn(ServerProtocol::Http);
        client
            .write_all(b"GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\n\r\n")
            .await
            .unwrap();

        let (_, mut far) = rx.recv().await.unwrap();
        let expected = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let mut request = vec![0u8; expected.len()];
        far.read_exact(&mut request).await.unwrap();

        let response: &[u8] =
            b"HTTP/1.1 103 Early Hints\r\nLink: </s.css>\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
        far.write_all(response).await.unwrap();

        let mut relayed = Vec::new();
        client.read_to_end(&mut relayed).await.unwrap();
        assert_eq!(relayed, response);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn malformed_http_gets_no_reply() {
        let (mut client, _rx, handle) = spawn(ServerProtocol::Http);
        client.write_all(b"\x05\x01\x00 nonsense\r\n\r\n").await.unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert!(reply.is_empty());
        assert!(matches!(handle.await.unwrap(), Err(Error::MalformedHttp(_))));
    }

    #[tokio::test]
    async fn silent_client_times_out() {
        let (dialer, _rx) = PipeDialer::new();
        let server =
            Server::new(ServerProtocol::Socks, dialer).with_io_timeout(Duration::from_millis(50));
        let (_client, inbound) = duplex(1024);
        assert!(matches!(server.handle(inbound).await, Err(Error::Timeout)));
    }
}
