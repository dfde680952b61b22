//! Periodic server statistics logging

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{info, instrument};

use crate::models::{ServerStats, StatsSnapshot};
use crate::proxy::pool::{PoolSnapshot, ProxyPool};

/// Logs [`ServerStats`] and pool sizes once per interval
pub struct StatsReporter {
    stats: Arc<ServerStats>,
    pool: Arc<ProxyPool>,
    interval: Duration,
}

impl StatsReporter {
    pub fn new(stats: Arc<ServerStats>, pool: Arc<ProxyPool>, interval: Duration) -> Self {
        Self {
            stats,
            pool,
            interval,
        }
    }

    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut report_interval = interval(self.interval);
        report_interval.tick().await; // Skip immediate tick

        loop {
            tokio::select! {
                _ = report_interval.tick() => {
                    self.report();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.report();
                        break;
                    }
                }
            }
        }
    }

    /// Log one snapshot and return it
    pub fn report(&self) -> (StatsSnapshot, PoolSnapshot) {
        let stats = self.stats.snapshot();
        let pool = self.pool.snapshot();
        let last_refresh = pool
            .last_refresh
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());

        info!(
            total_connections = stats.total_connections,
            active_connections = stats.active_connections,
            bytes_transferred = stats.bytes_transferred,
            tunnels_established = stats.tunnels_established,
            chained_tunnels = stats.chained_tunnels,
            rejected_requests = stats.rejected_requests,
            pool_all = pool.all,
            pool_available = pool.available,
            last_refresh = %last_refresh,
            "Status - total connections: {}, active: {}, bytes transferred: {}",
            stats.total_connections,
            stats.active_connections,
            stats.bytes_transferred
        );

        (stats, pool)
    }
}
