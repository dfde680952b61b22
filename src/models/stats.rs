use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Process-wide tunnel counters
///
/// Updated from many handler and relay tasks; reads are eventually consistent.
#[derive(Debug, Default)]
pub struct ServerStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    bytes_transferred: AtomicU64,
    tunnels_established: AtomicU64,
    chained_tunnels: AtomicU64,
    rejected_requests: AtomicU64,
}

/// Point-in-time copy of [`ServerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Connections accepted since startup
    pub total_connections: u64,
    /// Connections currently being handled
    pub active_connections: u64,
    /// Payload bytes relayed in both directions
    pub bytes_transferred: u64,
    /// Tunnels that reached the relay phase
    pub tunnels_established: u64,
    /// Tunnels routed through an upstream proxy
    pub chained_tunnels: u64,
    /// Requests answered with an error status
    pub rejected_requests: u64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an accepted connection; it stays active until the guard drops
    pub fn connection_opened(self: &Arc<Self>) -> ConnectionGuard {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard {
            stats: Arc::clone(self),
        }
    }

    pub fn add_bytes(&self, n: u64) {
        self.bytes_transferred.fetch_add(n, Ordering::Relaxed);
    }

    pub fn tunnel_established(&self, chained: bool) {
        self.tunnels_established.fetch_add(1, Ordering::Relaxed);
        if chained {
            self.chained_tunnels.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn request_rejected(&self) {
        self.rejected_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
            tunnels_established: self.tunnels_established.load(Ordering::Relaxed),
            chained_tunnels: self.chained_tunnels.load(Ordering::Relaxed),
            rejected_requests: self.rejected_requests.load(Ordering::Relaxed),
        }
    }
}

/// Guard for tracking an active client connection
pub struct ConnectionGuard {
    stats: Arc<ServerStats>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.stats.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}
