//! Liveness probing for upstream proxy candidates
//!
//! A candidate is alive when a request routed through it reaches the reference
//! endpoint and the response body carries one of the configured markers.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use tracing::{debug, info, instrument};

use crate::config::ProbeConfig;
use crate::error::{Result, TunnelError};
use crate::models::ProxyCandidate;

/// Result of a single liveness probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The reference service answered through the candidate
    Alive,
    /// A response arrived but without any marker (error or captive page)
    MarkerMissing,
    /// Transport failure: timeout, refused connection, TLS error
    Failed(String),
}

impl ProbeOutcome {
    pub fn is_alive(&self) -> bool {
        matches!(self, ProbeOutcome::Alive)
    }
}

/// Classifies proxy candidates as alive or dead
#[async_trait]
pub trait ProxyProber: Send + Sync {
    async fn probe(&self, candidate: &ProxyCandidate) -> ProbeOutcome;
}

/// Probes candidates with an HTTP(S) request to a fixed reference endpoint
pub struct HttpProber {
    config: ProbeConfig,
    headers: HeaderMap,
}

impl HttpProber {
    pub fn new(config: ProbeConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                TunnelError::InvalidConfig(format!("Invalid probe header name {}: {}", name, e))
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|e| {
                TunnelError::InvalidConfig(format!("Invalid probe header value for {}: {}", name, e))
            })?;
            headers.insert(header_name, header_value);
        }

        Ok(Self { config, headers })
    }

    /// Build a client that routes both http and https through the candidate
    fn client_for(&self, candidate: &ProxyCandidate) -> Result<Client> {
        let proxy = reqwest::Proxy::all(candidate.url())
            .map_err(|e| TunnelError::InvalidProxyAddress(format!("{}: {}", candidate, e)))?;

        // Certificate checks are off: the reference endpoint is only a liveness oracle.
        Client::builder()
            .proxy(proxy)
            .danger_accept_invalid_certs(true)
            .timeout(self.config.timeout())
            .default_headers(self.headers.clone())
            .build()
            .map_err(|e| TunnelError::Internal(format!("Failed to build probe client: {}", e)))
    }

    async fn fetch_body(&self, candidate: &ProxyCandidate) -> Result<String> {
        let client = self.client_for(candidate)?;
        let response = client.get(&self.config.url).send().await?;
        Ok(response.text().await?)
    }

    fn has_marker(&self, body: &str) -> bool {
        self.config
            .markers
            .iter()
            .any(|marker| body.contains(marker.as_str()))
    }
}

#[async_trait]
impl ProxyProber for HttpProber {
    #[instrument(skip(self), fields(proxy = %candidate))]
    async fn probe(&self, candidate: &ProxyCandidate) -> ProbeOutcome {
        match self.fetch_body(candidate).await {
            Ok(body) if self.has_marker(&body) => {
                info!("Found live proxy: {}", candidate);
                ProbeOutcome::Alive
            }
            Ok(_) => {
                debug!("Proxy {} answered without a liveness marker", candidate);
                ProbeOutcome::MarkerMissing
            }
            Err(e) => {
                debug!("Proxy {} failed probe: {}", candidate, e);
                ProbeOutcome::Failed(e.to_string())
            }
        }
    }
}
