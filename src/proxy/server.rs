//! Tunnel server accept loop
//!
//! Binds the listening socket and dispatches every accepted connection to its own
//! handler task.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, instrument};

use crate::config::ServerConfig;
use crate::error::{Result, TunnelError};
use crate::models::ServerStats;
use crate::proxy::handler::{ConnectionHandler, HandlerConfig};
use crate::proxy::pool::ProxySelector;

/// Listen backlog
pub const LISTEN_BACKLOG: u32 = 128;

/// HTTP CONNECT tunnel server
pub struct TunnelServer {
    config: ServerConfig,
    handler: Arc<ConnectionHandler>,
    limiter: Option<Arc<Semaphore>>,
}

impl TunnelServer {
    /// Create a new tunnel server
    pub fn new(
        config: ServerConfig,
        selector: Arc<dyn ProxySelector>,
        stats: Arc<ServerStats>,
    ) -> Self {
        let handler = Arc::new(ConnectionHandler::new(
            selector,
            stats,
            HandlerConfig::from(&config),
        ));

        // 0 keeps acceptance unbounded
        let limiter = match config.max_connections {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };

        Self {
            config,
            handler,
            limiter,
        }
    }

    pub fn stats(&self) -> &Arc<ServerStats> {
        self.handler.stats()
    }

    /// Bind the listening socket with address reuse enabled
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.resolve_addr().await?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(LISTEN_BACKLOG)?;

        info!("Tunnel proxy listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    async fn resolve_addr(&self) -> Result<SocketAddr> {
        let addr = self.config.addr();
        if let Ok(parsed) = addr.parse::<SocketAddr>() {
            return Ok(parsed);
        }

        let resolved = tokio::net::lookup_host(addr.as_str()).await?.next();
        resolved.ok_or_else(|| {
            TunnelError::InvalidConfig(format!("Cannot resolve listen address {}", addr))
        })
    }

    /// Accept connections until the shutdown flag flips
    ///
    /// In-flight handlers are left to drain on their own.
    #[instrument(skip_all)]
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            let permit = match self.acquire_permit(&mut shutdown).await {
                Some(permit) => permit,
                None => break,
            };

            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, client_addr)) => {
                            let handler = self.handler.clone();

                            tokio::spawn(async move {
                                let _permit = permit;
                                handler.handle(stream, client_addr).await;
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Tunnel server shutting down");
        Ok(())
    }

    /// Wait for a connection slot; `None` means shutdown was requested
    async fn acquire_permit(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<Option<OwnedSemaphorePermit>> {
        let Some(limiter) = &self.limiter else {
            return Some(None);
        };

        loop {
            tokio::select! {
                permit = limiter.clone().acquire_owned() => {
                    return permit.ok().map(Some);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return None;
                    }
                    debug!("Shutdown flag changed without stopping");
                }
            }
        }
    }
}
