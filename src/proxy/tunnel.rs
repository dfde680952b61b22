//! Bidirectional relay between a client and its resolved target
//!
//! Each direction copies until its source reaches EOF or fails, then half-closes its
//! destination. The session ends only when both directions have stopped.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, info, instrument};

use crate::models::ServerStats;

/// Read size per relay iteration
pub const RELAY_BUFFER_SIZE: usize = 4096;

/// Relay tuning
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub buffer_size: usize,
    /// Stop a direction after this long without data; `None` waits forever
    pub idle_timeout: Option<Duration>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_size: RELAY_BUFFER_SIZE,
            idle_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToTarget,
    TargetToClient,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ClientToTarget => "client->target",
            Direction::TargetToClient => "target->client",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload bytes forwarded per direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayOutcome {
    pub client_to_target: u64,
    pub target_to_client: u64,
}

impl RelayOutcome {
    pub fn total(&self) -> u64 {
        self.client_to_target + self.target_to_client
    }
}

/// One client <-> target relay instance
pub struct TunnelSession<C, T> {
    client: C,
    target: T,
    target_addr: String,
    client_early_data: Bytes,
    target_early_data: Bytes,
}

impl<C, T> TunnelSession<C, T>
where
    C: AsyncRead + AsyncWrite + Unpin + Send,
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(client: C, target: T, target_addr: impl Into<String>) -> Self {
        Self {
            client,
            target,
            target_addr: target_addr.into(),
            client_early_data: Bytes::new(),
            target_early_data: Bytes::new(),
        }
    }

    /// Client bytes received before the tunnel was established, sent to the target first
    pub fn with_client_early_data(mut self, early_data: Bytes) -> Self {
        self.client_early_data = early_data;
        self
    }

    /// Target bytes that arrived with the upstream CONNECT reply, sent to the client first
    pub fn with_target_early_data(mut self, early_data: Bytes) -> Self {
        self.target_early_data = early_data;
        self
    }

    /// Relay until both directions have stopped
    #[instrument(skip_all, fields(target = %self.target_addr))]
    pub async fn relay(self, stats: &ServerStats, config: &RelayConfig) -> RelayOutcome {
        let (client_read, client_write) = tokio::io::split(self.client);
        let (target_read, target_write) = tokio::io::split(self.target);

        let (client_to_target, target_to_client) = tokio::join!(
            pipe(
                client_read,
                target_write,
                self.client_early_data,
                Direction::ClientToTarget,
                &self.target_addr,
                stats,
                config,
            ),
            pipe(
                target_read,
                client_write,
                self.target_early_data,
                Direction::TargetToClient,
                &self.target_addr,
                stats,
                config,
            ),
        );

        RelayOutcome {
            client_to_target,
            target_to_client,
        }
    }
}

/// Copy one direction, returning the number of bytes written to `dst`
async fn pipe<R, W>(
    mut src: R,
    mut dst: W,
    early_data: Bytes,
    direction: Direction,
    target_addr: &str,
    stats: &ServerStats,
    config: &RelayConfig,
) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut transferred = 0u64;

    if !early_data.is_empty() {
        match dst.write_all(&early_data).await {
            Ok(()) => {
                transferred += early_data.len() as u64;
                stats.add_bytes(early_data.len() as u64);
            }
            Err(e) => {
                debug!("Relay {} write failed: {}", direction, e);
                let _ = dst.shutdown().await;
                return transferred;
            }
        }
    }

    let mut buf = vec![0u8; config.buffer_size.max(1)];
    loop {
        let read = match config.idle_timeout {
            Some(idle) => match timeout(idle, src.read(&mut buf)).await {
                Ok(read) => read,
                Err(_) => {
                    debug!("Relay {} idle for {:?}, closing", direction, idle);
                    break;
                }
            },
            None => src.read(&mut buf).await,
        };

        let n = match read {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("Relay {} read ended: {}", direction, e);
                break;
            }
        };

        if let Err(e) = dst.write_all(&buf[..n]).await {
            debug!("Relay {} write failed: {}", direction, e);
            break;
        }

        transferred += n as u64;
        stats.add_bytes(n as u64);
    }

    let _ = dst.shutdown().await;

    info!(
        "Tunnel closed {} - {}: {} bytes",
        target_addr, direction, transferred
    );

    transferred
}
