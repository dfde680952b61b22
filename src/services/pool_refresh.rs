//! Periodic proxy pool refresh
//!
//! The pool is already filled by `ProxyPool::start`, so cycles begin one full
//! interval after the service starts.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument};

use crate::proxy::pool::{ProxyPool, RefreshOutcome};

/// Pool refresh service
pub struct PoolRefreshService {
    pool: Arc<ProxyPool>,
    interval: Duration,
}

impl PoolRefreshService {
    pub fn new(pool: Arc<ProxyPool>, interval: Duration) -> Self {
        Self { pool, interval }
    }

    /// Run refresh cycles until shutdown
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting pool refresh service (interval: {}s)",
            self.interval.as_secs()
        );

        let mut refresh_interval = interval(self.interval);
        refresh_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        refresh_interval.tick().await; // Skip immediate tick

        loop {
            tokio::select! {
                _ = refresh_interval.tick() => {
                    // Refresh failures are logged by the pool and leave it untouched.
                    if let RefreshOutcome::Skipped = self.pool.refresh().await {
                        debug!("Refresh cycle skipped");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Pool refresh service shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TunnelError;
    use crate::proxy::pool::tests::{candidates, StubProber, StubSource};
    use crate::services::ServiceHandle;

    #[tokio::test]
    async fn test_refreshes_until_shutdown() {
        let source = Arc::new(StubSource::new(vec![
            Ok(candidates(&["a:1", "b:1"])),
            Err(TunnelError::Http("list unavailable".into())),
            Ok(candidates(&["c:1"])),
        ]));
        let prober = Arc::new(StubProber::new(&["a:1", "c:1"]));
        let pool = Arc::new(ProxyPool::start(source, prober, 10, 2).await);

        let (handle, shutdown) = ServiceHandle::new();
        let service = PoolRefreshService::new(pool.clone(), Duration::from_millis(50));
        let task = tokio::spawn(async move { service.run(shutdown).await });

        tokio::time::sleep(Duration::from_millis(400)).await;
        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("refresh service did not stop")
            .unwrap();

        // Startup found a:1, the failed fetch kept it, the next fetch added c:1.
        let mut available = pool.get_all_available();
        available.sort();
        assert_eq!(available, candidates(&["a:1", "c:1"]));
        assert_eq!(pool.snapshot().all, 1);
    }

    #[tokio::test]
    async fn test_waits_one_interval_before_refreshing() {
        let source = Arc::new(StubSource::new(vec![Ok(candidates(&["a:1", "b:1"]))]));
        let prober = Arc::new(StubProber::new(&["b:1"]));
        let pool = Arc::new(ProxyPool::new(source, prober, 10, 2));

        let (handle, shutdown) = ServiceHandle::new();
        let service = PoolRefreshService::new(pool.clone(), Duration::from_secs(300));
        let task = tokio::spawn(async move { service.run(shutdown).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("refresh service did not stop")
            .unwrap();

        let snapshot = pool.snapshot();
        assert_eq!(snapshot.all, 0);
        assert!(snapshot.last_refresh.is_none());
    }
}
