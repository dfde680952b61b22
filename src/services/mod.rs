//! Background services

pub mod pool_refresh;
pub mod stats_reporter;

pub use pool_refresh::PoolRefreshService;
pub use stats_reporter::StatsReporter;

use tokio::sync::watch;

/// Shutdown flag shared by the accept loop and background services
pub struct ServiceHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl ServiceHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    /// Another receiver for a service started later
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for ServiceHandle {
    fn default() -> Self {
        Self::new().0
    }
}
