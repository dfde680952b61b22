//! Per-connection CONNECT handling
//!
//! Reads the client's request head, resolves the target (direct first, then one
//! upstream candidate) and hands both streams to the relay.

use std::any::Any;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ServerConfig;
use crate::error::{Result, TunnelError};
use crate::models::ServerStats;
use crate::proxy::pool::ProxySelector;
use crate::proxy::request::{read_head, ConnectRequest, MAX_REQUEST_HEAD};
use crate::proxy::transport::ProxyTransport;
use crate::proxy::tunnel::{RelayConfig, TunnelSession};

/// Reply sent once the target is reachable
pub const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// Configuration for connection handler
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Idle time allowed between reads of the client's request head
    pub header_timeout: Duration,
    /// Direct connect timeout
    pub connect_timeout: Duration,
    /// Upstream proxy connect and reply timeout
    pub upstream_timeout: Duration,
    pub relay: RelayConfig,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for HandlerConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            header_timeout: config.header_timeout(),
            connect_timeout: config.connect_timeout(),
            upstream_timeout: config.upstream_timeout(),
            relay: RelayConfig {
                idle_timeout: config.idle_timeout(),
                ..RelayConfig::default()
            },
        }
    }
}

/// Resolved target stream
struct Resolved {
    stream: TcpStream,
    early_data: Bytes,
    chained: bool,
}

/// Connection handler
pub struct ConnectionHandler {
    selector: Arc<dyn ProxySelector>,
    stats: Arc<ServerStats>,
    config: HandlerConfig,
}

impl ConnectionHandler {
    pub fn new(
        selector: Arc<dyn ProxySelector>,
        stats: Arc<ServerStats>,
        config: HandlerConfig,
    ) -> Self {
        Self {
            selector,
            stats,
            config,
        }
    }

    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.stats
    }

    /// Serve one client connection to completion
    ///
    /// Never fails: every error is answered on the wire (or silently dropped) and the
    /// client is closed before returning. A panic while serving is answered with
    /// `500` if the client has not been sent a reply yet.
    #[instrument(skip_all, fields(peer = %peer))]
    pub async fn handle<S>(&self, mut client: S, peer: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let _guard = self.stats.connection_opened();
        info!("New connection from {}", peer);

        let mut replied = false;
        let result = AssertUnwindSafe(self.serve(&mut client, &mut replied))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let message = panic_message(&*panic);
                error!("Handler for {} panicked: {}", peer, message);
                Err(TunnelError::Internal(message))
            });

        if let Err(e) = result {
            if e.is_silent() {
                debug!("Closing {} without reply: {}", peer, e);
            } else if replied {
                warn!("Tunnel for {} aborted: {}", peer, e);
            } else {
                warn!("Rejecting {}: {}", peer, e);
                self.stats.request_rejected();
                let _ = client.write_all(error_response(&e).as_bytes()).await;
            }
        }

        let _ = client.shutdown().await;
    }

    async fn serve<S>(&self, client: &mut S, replied: &mut bool) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let head = match read_head(client, MAX_REQUEST_HEAD, Some(self.config.header_timeout)).await
        {
            Ok(head) => head,
            Err(e) if e.kind() == ErrorKind::TimedOut => return Err(TunnelError::ClientTimeout),
            Err(e) => {
                debug!("Client read failed: {}", e);
                return Err(TunnelError::ClientClosed);
            }
        };

        if head.is_empty() {
            return Err(TunnelError::ClientClosed);
        }

        let request = ConnectRequest::parse(&head.head)?;
        let authority = request.authority();
        info!("CONNECT request: {}", authority);

        let resolved = self.resolve(&request).await?;

        *replied = true;
        client
            .write_all(CONNECT_ESTABLISHED)
            .await
            .map_err(|_| TunnelError::ClientClosed)?;
        self.stats.tunnel_established(resolved.chained);

        let outcome = TunnelSession::new(&mut *client, resolved.stream, authority.as_str())
            .with_client_early_data(head.trailing)
            .with_target_early_data(resolved.early_data)
            .relay(&self.stats, &self.config.relay)
            .await;

        info!(
            "Tunnel {} finished: {} bytes up, {} bytes down",
            authority, outcome.client_to_target, outcome.target_to_client
        );
        Ok(())
    }

    /// Direct connect, falling back to a single upstream candidate
    async fn resolve(&self, request: &ConnectRequest) -> Result<Resolved> {
        match ProxyTransport::connect_direct(&request.host, request.port, self.config.connect_timeout)
            .await
        {
            Ok(stream) => {
                info!("Direct connection to {} succeeded", request.authority());
                return Ok(Resolved {
                    stream,
                    early_data: Bytes::new(),
                    chained: false,
                });
            }
            Err(e) => warn!("Direct connection to {} failed: {}", request.authority(), e),
        }

        let candidate = self
            .selector
            .select()
            .ok_or(TunnelError::NoProxiesAvailable)?;

        let upstream = ProxyTransport::connect_via_proxy(
            &candidate,
            &request.host,
            request.port,
            self.config.upstream_timeout,
        )
        .await?;

        info!("Connected to {} via upstream {}", request.authority(), candidate);
        Ok(Resolved {
            stream: upstream.stream,
            early_data: upstream.early_data,
            chained: true,
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// `HTTP/1.1 <code> <reason>` followed by `Connection: close`
pub fn error_response(error: &TunnelError) -> String {
    let status = error.status_code();
    format!(
        "HTTP/1.1 {} {}\r\nConnection: close\r\n\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Error")
    )
}
