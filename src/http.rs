//! HTTP/1.x proxy framing: CONNECT handshakes and single-exchange forwarding.
//!
//! Heads are parsed with `httparse` but forwarded byte for byte; only the
//! request line is ever rewritten.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    address::Address,
    config::DEFAULT_HTTP_PORT,
    dialer::HttpHop,
    error::{Error, Result},
};

pub const MAX_HEAD_SIZE: usize = 64 * 1024;
const MAX_HEADERS: usize = 64;

pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection established\r\n\r\n";
pub const BAD_GATEWAY: &[u8] =
    b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| p + 4)
}

fn malformed(e: impl std::fmt::Display) -> Error {
    Error::MalformedHttp(e.to_string())
}

/// Reads until `buffer` holds a complete head and returns its length.
///
/// Bytes past the head (a body, or tunnel payload sent early) stay in
/// `buffer` after the returned offset.
pub async fn read_head<S>(stream: &mut S, buffer: &mut Vec<u8>) -> Result<usize>
where
    S: AsyncRead + Unpin,
{
    let mut scanned = 0usize;
    loop {
        let from = scanned.saturating_sub(3);
        if let Some(end) = find_head_end(&buffer[from..]) {
            return Ok(from + end);
        }
        if buffer.len() >= MAX_HEAD_SIZE {
            return Err(Error::HeaderTooLarge(MAX_HEAD_SIZE));
        }
        scanned = buffer.len();
        buffer.reserve(4096);
        if stream.read_buf(buffer).await? == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
    }
}

/// Like [`read_head`] but never reads past the head, one byte at a time.
/// Used where the bytes that follow belong to someone else (a tunnel).
pub async fn read_head_exact<S>(stream: &mut S) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut head = Vec::with_capacity(128);
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_HEAD_SIZE {
            return Err(Error::HeaderTooLarge(MAX_HEAD_SIZE));
        }
        head.push(stream.read_u8().await?);
    }
    Ok(head)
}

fn header<'h>(headers: &'h [(String, Vec<u8>)], name: &str) -> Option<&'h [u8]> {
    headers
        .iter()
        .rev()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_slice())
}

fn collect_headers(headers: &[httparse::Header<'_>]) -> Vec<(String, Vec<u8>)> {
    headers
        .iter()
        .map(|h| (h.name.to_owned(), h.value.to_vec()))
        .collect()
}

/// How the length of a message body is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Empty,
    Length(u64),
    Chunked,
    UntilClose,
}

fn declared_framing(headers: &[(String, Vec<u8>)]) -> Result<Option<BodyFraming>> {
    if let Some(te) = header(headers, "transfer-encoding") {
        let te = String::from_utf8_lossy(te).to_ascii_lowercase();
        let last = te.rsplit(',').next().unwrap_or("").trim();
        return Ok(Some(if last == "chunked" {
            BodyFraming::Chunked
        } else {
            BodyFraming::UntilClose
        }));
    }
    match header(headers, "content-length") {
        Some(len) => {
            let len = std::str::from_utf8(len)
                .ok()
                .and_then(|l| l.trim().parse().ok())
                .ok_or_else(|| malformed("invalid Content-Length"))?;
            Ok(Some(BodyFraming::Length(len)))
        }
        None => Ok(None),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    /// Minor version: `1` for HTTP/1.1.
    pub version: u8,
    pub headers: Vec<(String, Vec<u8>)>,
    /// Header lines exactly as received, including the closing blank line.
    raw_headers: Vec<u8>,
}

impl RequestHead {
    pub fn parse(head: &[u8]) -> Result<Self> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(head).map_err(malformed)? {
            httparse::Status::Complete(_) => {}
            httparse::Status::Partial => return Err(malformed("incomplete request head")),
        }

        let line_end = head
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| malformed("missing request line"))?;
        Ok(Self {
            method: req.method.unwrap_or_default().to_owned(),
            target: req.path.unwrap_or_default().to_owned(),
            version: req.version.unwrap_or(1),
            headers: collect_headers(req.headers),
            raw_headers: head[line_end + 1..].to_vec(),
        })
    }

    pub fn header(&self, name: &str) -> Option<&[u8]> {
        header(&self.headers, name)
    }

    pub fn is_connect(&self) -> bool {
        self.method.eq_ignore_ascii_case("CONNECT")
    }

    fn host_header(&self) -> Result<&str> {
        self.header("host")
            .and_then(|h| std::str::from_utf8(h).ok())
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| malformed("missing Host header"))
    }

    /// Where the request wants to go: the authority of a CONNECT, otherwise
    /// the absolute-form target or the Host header.
    pub fn destination(&self) -> Result<Address> {
        if self.is_connect() {
            return Address::parse_with_default_port(&self.target, 443);
        }

        let uri: http::Uri = self.target.parse().map_err(malformed)?;
        match uri.authority() {
            Some(authority) => {
                let default_port = match uri.scheme_str() {
                    Some("https") => 443,
                    _ => DEFAULT_HTTP_PORT,
                };
                let host = authority.host().trim_start_matches('[').trim_end_matches(']');
                Ok(Address::new(host, authority.port_u16().unwrap_or(default_port)))
            }
            None => Address::parse_with_default_port(self.host_header()?, DEFAULT_HTTP_PORT),
        }
    }

    pub fn body_framing(&self) -> Result<BodyFraming> {
        match declared_framing(&self.headers)? {
            Some(BodyFraming::UntilClose) => Err(malformed("unsupported Transfer-Encoding")),
            Some(framing) => Ok(framing),
            None => Ok(BodyFraming::Empty),
        }
    }

    /// Re-encodes the head for the next hop. Origin servers get an
    /// origin-form target, HTTP proxies an absolute-form one; headers are
    /// copied unchanged.
    pub fn encode(&self, hop: HttpHop) -> Result<Vec<u8>> {
        let uri: http::Uri = self.target.parse().map_err(malformed)?;
        let target = match (hop, uri.authority().is_some()) {
            (HttpHop::Origin, true) => uri
                .path_and_query()
                .map(|p| p.as_str())
                .filter(|p| !p.is_empty())
                .unwrap_or("/")
                .to_owned(),
            (HttpHop::Proxy, false) => format!("http://{}{}", self.host_header()?, self.target),
            _ => self.target.clone(),
        };

        let mut buffer = format!("{} {} HTTP/1.{}\r\n", self.method, target, self.version).into_bytes();
        buffer.extend_from_slice(&self.raw_headers);
        Ok(buffer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub code: u16,
    pub reason: String,
    pub headers: Vec<(String, Vec<u8>)>,
}

impl ResponseHead {
    pub fn parse(head: &[u8]) -> Result<Self> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut res = httparse::Response::new(&mut headers);
        match res.parse(head).map_err(malformed)? {
            httparse::Status::Complete(_) => {}
            httparse::Status::Partial => return Err(malformed("incomplete response head")),
        }
        Ok(Self {
            code: res.code.ok_or_else(|| malformed("missing status code"))?,
            reason: res.reason.unwrap_or_default().to_owned(),
            headers: collect_headers(res.headers),
        })
    }

    /// A 1xx head other than 101: the final response still follows it.
    pub fn is_interim(&self) -> bool {
        (100..200).contains(&self.code) && self.code != 101
    }

    /// Body framing of this response to a request made with `method`.
    pub fn body_framing(&self, method: &str) -> Result<BodyFraming> {
        if method.eq_ignore_ascii_case("HEAD")
            || (100..200).contains(&self.code)
            || self.code == 204
            || self.code == 304
        {
            return Ok(BodyFraming::Empty);
        }
        Ok(declared_framing(&self.headers)?.unwrap_or(BodyFraming::UntilClose))
    }
}

pub fn connect_request(destination: &Address) -> Vec<u8> {
    format!("CONNECT {destination} HTTP/1.1\r\nHost: {destination}\r\n\r\n").into_bytes()
}

fn parse_chunk_size(line: &[u8]) -> Result<u64> {
    let line = std::str::from_utf8(line).map_err(malformed)?;
    let size = line.split(';').next().unwrap_or("").trim();
    u64::from_str_radix(size, 16).map_err(|_| malformed("invalid chunk size"))
}

async fn copy_exact<R, W>(reader: &mut R, writer: &mut W, len: u64) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let copied = tokio::io::copy(&mut reader.take(len), writer).await?;
    if copied < len {
        return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
    }
    Ok(copied)
}

/// Copies one message body from `reader` to `writer`, byte for byte,
/// stopping exactly at its end.
pub async fn relay_body<R, W>(reader: &mut R, writer: &mut W, framing: BodyFraming) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match framing {
        BodyFraming::Empty => Ok(0),
        BodyFraming::Length(len) => copy_exact(reader, writer, len).await,
        BodyFraming::UntilClose => Ok(tokio::io::copy(reader, writer).await?),
        BodyFraming::Chunked => {
            let mut total = 0;
            let mut line = Vec::new();
            loop {
                line.clear();
                if reader.read_until(b'\n', &mut line).await? == 0 {
                    return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
                }
                writer.write_all(&line).await?;
                total += line.len() as u64;

                let size = parse_chunk_size(&line)?;
                if size == 0 {
                    break;
                }
                // chunk data plus its CRLF
                let len = size
                    .checked_add(2)
                    .ok_or_else(|| malformed("chunk size too large"))?;
                total += copy_exact(reader, writer, len).await?;
            }
            // trailers, up to the blank line
            loop {
                line.clear();
                if reader.read_until(b'\n', &mut line).await? == 0 {
                    return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
                }
                writer.write_all(&line).await?;
                total += line.len() as u64;
                if line == b"\r\n" || line == b"\n" {
                    return Ok(total);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::BufReader;

    use super::*;

    #[test]
    fn absolute_form_request() {
        let head = b"GET http://example.com:8080/a?b=1 HTTP/1.1\r\nHost: example.com:8080\r\nX-Y: z\r\n\r\n";
        let req = RequestHead::parse(head).unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.destination().unwrap(), Address::new("example.com", 8080));
        assert_eq!(req.body_framing().unwrap(), BodyFraming::Empty);

        let origin = req.encode(HttpHop::Origin).unwrap();
        assert_eq!(
            origin,
            b"GET /a?b=1 HTTP/1.1\r\nHost: example.com:8080\r\nX-Y: z\r\n\r\n"
        );
        assert_eq!(req.encode(HttpHop::Proxy).unwrap(), head);
    }

    #[test]
    fn origin_form_request_uses_host() {
        let head = b"POST /upload HTTP/1.0\r\nhost: [::1]\r\nContent-Length: 3\r\n\r\n";
        let req = RequestHead::parse(head).unwrap();
        assert_eq!(req.destination().unwrap(), Address::new("::1", 80));
        assert_eq!(req.body_framing().unwrap(), BodyFraming::Length(3));
        assert_eq!(
            req.encode(HttpHop::Proxy).unwrap(),
            b"POST http://[::1]/upload HTTP/1.0\r\nhost: [::1]\r\nContent-Length: 3\r\n\r\n"
        );
    }

    #[test]
    fn absolute_form_ipv6() {
        let req = RequestHead::parse(b"GET http://[::1]:81/ HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.destination().unwrap(), Address::new("::1", 81));
    }

    #[test]
    fn connect_request_round_trip() {
        let dest = Address::new("example.com", 443);
        let bytes = connect_request(&dest);
        assert_eq!(
            bytes,
            b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n"
        );
        let req = RequestHead::parse(&bytes).unwrap();
        assert!(req.is_connect());
        assert_eq!(req.destination().unwrap(), dest);
    }

    #[test]
    fn missing_host() {
        let req = RequestHead::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert!(matches!(req.destination(), Err(Error::MalformedHttp(_))));
    }

    #[test]
    fn response_framing() {
        let res = ResponseHead::parse(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: gzip, chunked\r\n\r\n").unwrap();
        assert_eq!(res.body_framing("GET").unwrap(), BodyFraming::Chunked);
        assert_eq!(res.body_framing("HEAD").unwrap(), BodyFraming::Empty);

        let res = ResponseHead::parse(b"HTTP/1.0 404 Not Found\r\n\r\n").unwrap();
        assert_eq!((res.code, res.reason.as_str()), (404, "Not Found"));
        assert_eq!(res.body_framing("GET").unwrap(), BodyFraming::UntilClose);

        let res = ResponseHead::parse(b"HTTP/1.1 304 Not Modified\r\nContent-Length: 9\r\n\r\n").unwrap();
        assert_eq!(res.body_framing("GET").unwrap(), BodyFraming::Empty);
    }

    #[tokio::test]
    async fn read_head_keeps_leftover() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        b.write_all(b"CONNECT h:1 HTTP/1.1\r\n\r\n\x16\x03\x01").await.unwrap();
        let mut buffer = Vec::new();
        let end = read_head(&mut a, &mut buffer).await.unwrap();
        assert_eq!(&buffer[end..], b"\x16\x03\x01");
    }

    #[tokio::test]
    async fn read_head_exact_stops_at_blank_line() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        b.write_all(b"HTTP/1.1 200 OK\r\n\r\npayload").await.unwrap();
        let head = read_head_exact(&mut a).await.unwrap();
        assert_eq!(head, b"HTTP/1.1 200 OK\r\n\r\n");
        let mut rest = [0u8; 7];
        a.read_exact(&mut rest).await.unwrap();
        assert_eq!(&rest, b"payload");
    }

    #[tokio::test]
    async fn oversized_head() {
        let (mut a, mut b) = tokio::io::duplex(MAX_HEAD_SIZE * 2);
        b.write_all(&vec![b'a'; MAX_HEAD_SIZE + 10]).await.unwrap();
        let mut buffer = Vec::new();
        assert!(matches!(
            read_head(&mut a, &mut buffer).await,
            Err(Error::HeaderTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn chunked_body_is_copied_verbatim() {
        let body = b"4;ext=1\r\nWiki\r\n5\r\npedia\r\n0\r\nX-Trailer: t\r\n\r\n";
        let mut input = Vec::from(&body[..]);
        input.extend_from_slice(b"NEXT");
        let mut reader = BufReader::new(&input[..]);
        let mut out = Vec::new();
        let n = relay_body(&mut reader, &mut out, BodyFraming::Chunked).await.unwrap();
        assert_eq!(out, body);
        assert_eq!(n as usize, body.len());

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"NEXT");
    }

    #[tokio::test]
    async fn short_body_is_an_error() {
        let mut reader = BufReader::new(&b"abc"[..]);
        let mut out = Vec::new();
        let err = relay_body(&mut reader, &mut out, BodyFraming::Length(5))
            .await
            .unwrap_err();
        assert_eq!(err.io_kind(), Some(std::io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn huge_chunk_size_is_malformed() {
        let mut reader = BufReader::new(&b"ffffffffffffffff\r\nabc"[..]);
        let mut out = Vec::new();
        let err = relay_body(&mut reader, &mut out, BodyFraming::Chunked)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedHttp(_)), "{err:?}");
    }

    #[test]
    fn interim_responses() {
        let hints = ResponseHead::parse(b"HTTP/1.1 103 Early Hints\r\nLink: </s.css>\r\n\r\n").unwrap();
        assert!(hints.is_interim());
        let switching = ResponseHead::parse(b"HTTP/1.1 101 Switching Protocols\r\n\r\n").unwrap();
        assert!(!switching.is_interim());
        let ok = ResponseHead::parse(b"HTTP/1.1 200 OK\r\n\r\n").unwrap();
        assert!(!ok.is_interim());
    }
}
