//! Remote proxy list source
//!
//! Fetches a newline-delimited list of `host:port` candidates.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{info, instrument};

use crate::error::{Result, TunnelError};
use crate::models::ProxyCandidate;

/// Source of fresh proxy candidates
#[async_trait]
pub trait ProxySource: Send + Sync {
    /// Fetch the full candidate list
    ///
    /// An error or an empty list both mean "no update available".
    async fn fetch(&self) -> Result<Vec<ProxyCandidate>>;
}

/// Fetches candidates from a plain-text list over HTTP
pub struct HttpProxySource {
    client: Client,
    url: String,
}

impl HttpProxySource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| TunnelError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ProxySource for HttpProxySource {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<Vec<ProxyCandidate>> {
        let response = self.client.get(&self.url).send().await?;

        if response.status() != StatusCode::OK {
            return Err(TunnelError::UnexpectedStatus(response.status().as_u16()));
        }

        let body = response.text().await?;
        let proxies = parse_proxy_list(&body);
        info!("Fetched {} proxy candidates", proxies.len());

        Ok(proxies)
    }
}

/// Parse list content: one candidate per line, `#` comments and blank lines skipped
pub fn parse_proxy_list(content: &str) -> Vec<ProxyCandidate> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ProxyCandidate::from)
        .collect()
}
