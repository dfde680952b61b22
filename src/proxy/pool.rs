//! Self-refreshing pool of upstream proxy candidates
//!
//! Each refresh cycle runs FETCH -> SAMPLE -> PROBE -> MERGE -> SWAP. Survivors of
//! the previous cycle are re-probed every time; a failed re-probe is the only way a
//! candidate leaves the available set.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tracing::{info, instrument, warn};

use crate::models::ProxyCandidate;
use crate::proxy::health::ProxyProber;
use crate::proxy::source::ProxySource;

/// Trait for picking an upstream candidate for a chained connection
pub trait ProxySelector: Send + Sync {
    /// Select a candidate, or `None` if nothing is known
    fn select(&self) -> Option<ProxyCandidate>;
}

#[derive(Debug, Default)]
struct PoolState {
    /// Every candidate from the last successful fetch
    all: Vec<ProxyCandidate>,
    /// Candidates that passed the most recent probe
    available: Vec<ProxyCandidate>,
    last_refresh: Option<DateTime<Utc>>,
}

/// Point-in-time view of the pool sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub all: usize,
    pub available: usize,
    pub last_refresh: Option<DateTime<Utc>>,
}

/// What a refresh cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Fetch failed or returned nothing; the pool was left untouched
    Skipped,
    /// The pool was swapped
    Updated {
        fetched: usize,
        probed: usize,
        available: usize,
    },
}

/// Proxy pool manager
pub struct ProxyPool {
    source: Arc<dyn ProxySource>,
    prober: Arc<dyn ProxyProber>,
    sample_size: usize,
    probe_workers: usize,
    state: Mutex<PoolState>,
}

impl ProxyPool {
    pub fn new(
        source: Arc<dyn ProxySource>,
        prober: Arc<dyn ProxyProber>,
        sample_size: usize,
        probe_workers: usize,
    ) -> Self {
        Self {
            source,
            prober,
            sample_size,
            probe_workers: probe_workers.max(1),
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Build the pool and run the first refresh before handing it out
    ///
    /// A failed first fetch still returns the (empty) pool; the refresh service
    /// retries on its next tick.
    pub async fn start(
        source: Arc<dyn ProxySource>,
        prober: Arc<dyn ProxyProber>,
        sample_size: usize,
        probe_workers: usize,
    ) -> Self {
        let pool = Self::new(source, prober, sample_size, probe_workers);
        if pool.refresh().await == RefreshOutcome::Skipped {
            warn!("Initial proxy refresh produced no candidates");
        }
        pool
    }

    /// Run one refresh cycle
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> RefreshOutcome {
        info!("Refreshing proxy pool");

        let fresh = match self.source.fetch().await {
            Ok(list) if !list.is_empty() => list,
            Ok(_) => {
                warn!("Proxy source returned no candidates, keeping current pool");
                return RefreshOutcome::Skipped;
            }
            Err(e) => {
                warn!("Failed to fetch proxy list: {}, keeping current pool", e);
                return RefreshOutcome::Skipped;
            }
        };

        let sample = self.sample(&fresh);
        let survivors = self.get_all_available();
        if !survivors.is_empty() {
            info!("Re-testing {} available proxies", survivors.len());
        }

        // A candidate that is both sampled and a survivor is probed once.
        let mut seen = HashSet::new();
        let candidates: Vec<ProxyCandidate> = sample
            .into_iter()
            .chain(survivors)
            .filter(|candidate| seen.insert(candidate.clone()))
            .collect();
        let probed = candidates.len();

        let alive = self.probe_all(candidates).await;

        let fetched = fresh.len();
        let available = alive.len();
        {
            let mut state = self.state.lock();
            state.all = fresh;
            state.available = alive;
            state.last_refresh = Some(Utc::now());
        }

        info!(
            "Proxy pool refreshed: {} fetched, {} probed, {} available",
            fetched, probed, available
        );

        RefreshOutcome::Updated {
            fetched,
            probed,
            available,
        }
    }

    /// Choose a bounded random subset of the fresh fetch
    fn sample(&self, fresh: &[ProxyCandidate]) -> Vec<ProxyCandidate> {
        let mut rng = rand::thread_rng();
        fresh
            .choose_multiple(&mut rng, self.sample_size.min(fresh.len()))
            .cloned()
            .collect()
    }

    async fn probe_all(&self, candidates: Vec<ProxyCandidate>) -> Vec<ProxyCandidate> {
        futures::stream::iter(candidates)
            .map(|candidate| async move {
                let outcome = self.prober.probe(&candidate).await;
                outcome.is_alive().then_some(candidate)
            })
            .buffer_unordered(self.probe_workers)
            .filter_map(|alive| async move { alive })
            .collect()
            .await
    }

    /// Random verified candidate, falling back to an untested one from the last fetch
    pub fn get_random_proxy(&self) -> Option<ProxyCandidate> {
        let state = self.state.lock();
        let mut rng = rand::thread_rng();

        if !state.available.is_empty() {
            state.available.choose(&mut rng).cloned()
        } else {
            state.all.choose(&mut rng).cloned()
        }
    }

    /// Copy of the verified candidates
    pub fn get_all_available(&self) -> Vec<ProxyCandidate> {
        self.state.lock().available.clone()
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.state.lock();
        PoolSnapshot {
            all: state.all.len(),
            available: state.available.len(),
            last_refresh: state.last_refresh,
        }
    }
}

impl ProxySelector for ProxyPool {
    fn select(&self) -> Option<ProxyCandidate> {
        self.get_random_proxy()
    }
}
