//! Outbound connection establishment
//!
//! Handles direct connects and HTTP CONNECT chaining through an upstream proxy.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, instrument};

use crate::error::{Result, TunnelError};
use crate::models::{format_host_port, ProxyCandidate, ProxyEndpoint};
use crate::proxy::request::read_head;

/// Cap on the upstream CONNECT reply head
const MAX_CONNECT_RESPONSE: usize = 4096;

/// Stream to the target plus any target bytes that arrived with the CONNECT reply
pub struct UpstreamConnection {
    pub stream: TcpStream,
    pub early_data: Bytes,
}

/// Proxy transport handler
pub struct ProxyTransport;

impl ProxyTransport {
    /// Connect straight to the target
    #[instrument(skip(connect_timeout))]
    pub async fn connect_direct(
        target_host: &str,
        target_port: u16,
        connect_timeout: Duration,
    ) -> Result<TcpStream> {
        match timeout(connect_timeout, TcpStream::connect((target_host, target_port))).await {
            Ok(Ok(stream)) => {
                debug!("Direct connection to {}:{} established", target_host, target_port);
                Ok(stream)
            }
            Ok(Err(e)) => Err(TunnelError::DirectConnectFailed(e.to_string())),
            Err(_) => Err(TunnelError::DirectConnectFailed(format!(
                "timed out after {}s",
                connect_timeout.as_secs()
            ))),
        }
    }

    /// Open a tunnel to the target through an upstream HTTP proxy
    ///
    /// `upstream_timeout` bounds the TCP connect and, separately, the CONNECT exchange.
    #[instrument(skip(upstream_timeout), fields(proxy = %candidate))]
    pub async fn connect_via_proxy(
        candidate: &ProxyCandidate,
        target_host: &str,
        target_port: u16,
        upstream_timeout: Duration,
    ) -> Result<UpstreamConnection> {
        let endpoint = candidate.endpoint()?;
        debug!("Connecting to upstream proxy at {}", endpoint.addr());

        let mut stream = match timeout(upstream_timeout, TcpStream::connect(endpoint.addr())).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(TunnelError::ProxyConnectionFailed(format!(
                    "TCP connect to {} failed: {}",
                    candidate, e
                )))
            }
            Err(_) => {
                return Err(TunnelError::ProxyConnectionFailed(format!(
                    "TCP connect to {} timed out",
                    candidate
                )))
            }
        };

        let early_data = match timeout(
            upstream_timeout,
            Self::handshake(&mut stream, &endpoint, target_host, target_port),
        )
        .await
        {
            Ok(Ok(early_data)) => early_data,
            Ok(Err(e)) => {
                return Err(TunnelError::ProxyConnectionFailed(format!(
                    "{}: {}",
                    candidate, e
                )))
            }
            Err(_) => {
                return Err(TunnelError::ProxyConnectionFailed(format!(
                    "{}: CONNECT response timed out",
                    candidate
                )))
            }
        };

        debug!("HTTP CONNECT tunnel established");
        Ok(UpstreamConnection { stream, early_data })
    }

    async fn handshake(
        stream: &mut TcpStream,
        endpoint: &ProxyEndpoint,
        target_host: &str,
        target_port: u16,
    ) -> anyhow::Result<Bytes> {
        let request = Self::build_connect_request(endpoint, target_host, target_port);
        stream.write_all(request.as_bytes()).await?;

        let response = read_head(stream, MAX_CONNECT_RESPONSE, None).await?;
        if response.head.is_empty() {
            anyhow::bail!("empty CONNECT response");
        }

        if !is_connect_established(&response.head) {
            let text = String::from_utf8_lossy(&response.head);
            anyhow::bail!(
                "CONNECT rejected: {}",
                text.lines().next().unwrap_or("Unknown error")
            );
        }

        Ok(response.trailing)
    }

    /// Build HTTP CONNECT request
    fn build_connect_request(endpoint: &ProxyEndpoint, target_host: &str, target_port: u16) -> String {
        let authority = format_host_port(target_host, target_port);
        let mut request = format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n", authority, authority);

        if let Some(credentials) = endpoint.basic_auth() {
            request.push_str(&format!("Proxy-Authorization: {}\r\n", credentials));
        }

        request.push_str("\r\n");
        request
    }
}

/// Whether an upstream reply head carries a `200` status line
pub fn is_connect_established(response: &[u8]) -> bool {
    let text = String::from_utf8_lossy(response);
    let status_line = text.lines().next().unwrap_or("");
    let mut parts = status_line.split_whitespace();

    matches!(
        (parts.next(), parts.next()),
        (Some(version), Some("200")) if version.starts_with("HTTP/")
    )
}
