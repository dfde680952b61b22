//! CONNECT request parsing
//!
//! Only the request line is interpreted; headers are read and discarded.

use std::io;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

use crate::error::{Result, TunnelError};
use crate::models::format_host_port;

/// Cap on the request head read from a client
pub const MAX_REQUEST_HEAD: usize = 8192;

/// Port used when a CONNECT target has none
pub const DEFAULT_CONNECT_PORT: u16 = 443;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";
const READ_CHUNK: usize = 1024;

/// A request head plus any bytes the peer sent after it
#[derive(Debug, Default)]
pub struct RequestHead {
    pub head: Bytes,
    pub trailing: Bytes,
}

impl RequestHead {
    pub fn is_empty(&self) -> bool {
        self.head.is_empty() && self.trailing.is_empty()
    }
}

/// Read until the end of the header block, EOF, or `limit` bytes
///
/// Oversized heads are cut off at `limit` and returned as-is. `idle_timeout` bounds
/// each individual read; expiry surfaces as `io::ErrorKind::TimedOut`.
pub async fn read_head<R>(
    reader: &mut R,
    limit: usize,
    idle_timeout: Option<Duration>,
) -> io::Result<RequestHead>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        if let Some(pos) = find_terminator(&buf) {
            let mut head = buf;
            let trailing = head.split_off(pos + HEAD_TERMINATOR.len());
            return Ok(RequestHead {
                head: head.freeze(),
                trailing: trailing.freeze(),
            });
        }

        if buf.len() >= limit {
            break;
        }

        let n = match idle_timeout {
            Some(idle) => timeout(idle, reader.read(&mut chunk))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "request head read idle"))??,
            None => reader.read(&mut chunk).await?,
        };
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Ok(RequestHead {
        head: buf.freeze(),
        trailing: Bytes::new(),
    })
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_TERMINATOR.len())
        .position(|window| window == HEAD_TERMINATOR)
}

/// Parsed `CONNECT host:port HTTP/1.x` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub host: String,
    pub port: u16,
}

impl ConnectRequest {
    /// Parse the first line of a request head
    pub fn parse(head: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(head);
        let request_line = text.lines().next().unwrap_or("");
        let mut tokens = request_line.split_whitespace();

        let method = tokens
            .next()
            .ok_or_else(|| TunnelError::BadRequest("empty request line".to_string()))?;

        if method != "CONNECT" {
            return Err(TunnelError::MethodNotAllowed(method.to_string()));
        }

        let target = tokens
            .next()
            .ok_or_else(|| TunnelError::BadRequest("missing CONNECT target".to_string()))?;

        let (host, port) = parse_authority(target)?;
        Ok(Self { host, port })
    }

    /// Target as `host:port`
    pub fn authority(&self) -> String {
        format_host_port(&self.host, self.port)
    }
}

/// Parse `host[:port]`, accepting bracketed IPv6; the port defaults to 443
pub fn parse_authority(authority: &str) -> Result<(String, u16)> {
    let invalid = || TunnelError::BadRequest(format!("invalid CONNECT target: {}", authority));

    let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
        let (host, after) = rest.split_once(']').ok_or_else(invalid)?;
        let port = match after {
            "" => None,
            _ => Some(after.strip_prefix(':').ok_or_else(invalid)?),
        };
        (host, port)
    } else if let Some((host, port)) = authority.rsplit_once(':') {
        if host.contains(':') {
            // Unbracketed IPv6 literal
            return Err(invalid());
        }
        (host, Some(port))
    } else {
        (authority, None)
    };

    if host.is_empty() {
        return Err(invalid());
    }

    let port = match port {
        Some(raw) => match raw.parse::<u16>() {
            Ok(p) if p != 0 => p,
            _ => return Err(invalid()),
        },
        None => DEFAULT_CONNECT_PORT,
    };

    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connect() {
        let request =
            ConnectRequest::parse(b"CONNECT example.test:443 HTTP/1.1\r\nHost: example.test\r\n\r\n")
                .unwrap();
        assert_eq!(request.host, "example.test");
        assert_eq!(request.port, 443);
        assert_eq!(request.authority(), "example.test:443");
    }

    #[test]
    fn test_parse_connect_default_port() {
        let request = ConnectRequest::parse(b"CONNECT example.test HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(request.port, 443);
    }

    #[test]
    fn test_parse_connect_ipv6() {
        let request = ConnectRequest::parse(b"CONNECT [::1]:8443 HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(request.host, "::1");
        assert_eq!(request.port, 8443);
        assert_eq!(request.authority(), "[::1]:8443");

        let request = ConnectRequest::parse(b"CONNECT [2001:db8::1] HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(request.host, "2001:db8::1");
        assert_eq!(request.port, 443);
    }

    #[test]
    fn test_parse_rejects_other_methods() {
        let err = ConnectRequest::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap_err();
        assert!(matches!(err, TunnelError::MethodNotAllowed(ref m) if m == "GET"));

        let err = ConnectRequest::parse(b"connect example.test:443 HTTP/1.1\r\n\r\n").unwrap_err();
        assert!(matches!(err, TunnelError::MethodNotAllowed(_)));
    }

    #[test]
    fn test_parse_malformed() {
        for head in [
            &b"CONNECT\r\n\r\n"[..],
            b"\r\n\r\n",
            b"CONNECT :443 HTTP/1.1\r\n\r\n",
            b"CONNECT example.test: HTTP/1.1\r\n\r\n",
            b"CONNECT example.test:https HTTP/1.1\r\n\r\n",
            b"CONNECT example.test:70000 HTTP/1.1\r\n\r\n",
            b"CONNECT example.test:0 HTTP/1.1\r\n\r\n",
            b"CONNECT ::1:443 HTTP/1.1\r\n\r\n",
            b"CONNECT [::1 HTTP/1.1\r\n\r\n",
        ] {
            let err = ConnectRequest::parse(head).unwrap_err();
            assert!(
                matches!(err, TunnelError::BadRequest(_)),
                "expected 400 for {:?}",
                String::from_utf8_lossy(head)
            );
        }
    }

    #[tokio::test]
    async fn test_read_head_splits_trailing_bytes() {
        let mut reader = tokio_test::io::Builder::new()
            .read(b"CONNECT a:443 HTTP/1.1\r\n")
            .read(b"Host: a\r\n\r\n\x16\x03\x01")
            .build();

        let head = read_head(&mut reader, MAX_REQUEST_HEAD, None).await.unwrap();
        assert_eq!(&head.head[..], b"CONNECT a:443 HTTP/1.1\r\nHost: a\r\n\r\n");
        assert_eq!(&head.trailing[..], b"\x16\x03\x01");
    }

    #[tokio::test]
    async fn test_read_head_eof_before_terminator() {
        let mut reader = tokio_test::io::Builder::new().read(b"CONNECT a:443").build();

        let head = read_head(&mut reader, MAX_REQUEST_HEAD, None).await.unwrap();
        assert_eq!(&head.head[..], b"CONNECT a:443");
        assert!(head.trailing.is_empty());
    }

    #[tokio::test]
    async fn test_read_head_empty() {
        let mut reader = tokio_test::io::Builder::new().build();
        let head = read_head(&mut reader, MAX_REQUEST_HEAD, None).await.unwrap();
        assert!(head.is_empty());
    }

    #[tokio::test]
    async fn test_read_head_caps_oversized() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let junk = vec![b'a'; 3 * MAX_REQUEST_HEAD];
        tokio::io::AsyncWriteExt::write_all(&mut client, &junk)
            .await
            .unwrap();

        let head = read_head(&mut server, MAX_REQUEST_HEAD, None).await.unwrap();
        assert!(head.head.len() >= MAX_REQUEST_HEAD);
        assert!(head.head.len() < MAX_REQUEST_HEAD + READ_CHUNK);
    }

    #[tokio::test]
    async fn test_read_head_idle_timeout_restarts_per_read() {
        let mut reader = tokio_test::io::Builder::new()
            .read(b"CONNECT a:443 ")
            .wait(Duration::from_millis(150))
            .read(b"HTTP/1.1\r\n")
            .wait(Duration::from_millis(150))
            .read(b"\r\n")
            .build();

        // 300ms in total, but no single gap reaches the 250ms idle limit.
        let head = read_head(&mut reader, MAX_REQUEST_HEAD, Some(Duration::from_millis(250)))
            .await
            .unwrap();
        assert_eq!(&head.head[..], b"CONNECT a:443 HTTP/1.1\r\n\r\n");
    }

    #[tokio::test]
    async fn test_read_head_idle_timeout_expires() {
        let (_client, mut server) = tokio::io::duplex(1024);

        let err = read_head(&mut server, MAX_REQUEST_HEAD, Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
