use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::error::{Result, TunnelError};

/// A third-party forwarding proxy as listed by the source, usually `host:port`
///
/// The raw string is kept verbatim; it is only parsed when a connection is made.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProxyCandidate(String);

impl ProxyCandidate {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Proxy URL for HTTP clients (`http://host:port`)
    pub fn url(&self) -> String {
        if self.0.contains("://") {
            self.0.clone()
        } else {
            format!("http://{}", self.0)
        }
    }

    /// Parse the candidate into a dialable endpoint
    ///
    /// Accepts `host:port`, `http://host:port`, `user:pass@host:port` and
    /// bracketed IPv6 hosts. A missing port defaults to 80.
    pub fn endpoint(&self) -> Result<ProxyEndpoint> {
        let raw = self.0.trim();
        let without_scheme = raw
            .strip_prefix("http://")
            .or_else(|| raw.strip_prefix("https://"))
            .unwrap_or(raw);

        if without_scheme.is_empty() || without_scheme.contains('/') {
            return Err(TunnelError::InvalidProxyAddress(raw.to_string()));
        }

        // Use URL parsing to properly handle bracketed IPv6 like "[::1]:8080".
        let url = url::Url::parse(&format!("http://{}", without_scheme))?;

        let host = url
            .host_str()
            .ok_or_else(|| TunnelError::InvalidProxyAddress(raw.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']').to_string();
        let port = url.port_or_known_default().unwrap_or(80);

        let username = (!url.username().is_empty()).then(|| url.username().to_string());
        let password = url.password().map(|p| p.to_string());

        Ok(ProxyEndpoint {
            host,
            port,
            username,
            password,
        })
    }
}

impl fmt::Display for ProxyCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProxyCandidate {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for ProxyCandidate {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// Parsed, dialable form of a [`ProxyCandidate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyEndpoint {
    /// Socket address string, bracketing IPv6 hosts
    pub fn addr(&self) -> String {
        format_host_port(&self.host, self.port)
    }

    /// Value for a `Proxy-Authorization` header, if credentials are present
    pub fn basic_auth(&self) -> Option<String> {
        let username = self.username.as_ref()?;
        let password = self.password.as_deref().unwrap_or("");
        let credentials = format!("{}:{}", username, password);
        Some(format!("Basic {}", BASE64.encode(credentials.as_bytes())))
    }
}

/// Format `host:port`, bracketing IPv6 literals
pub fn format_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
