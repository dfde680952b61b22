use crate::error::{Result, TunnelError};
use std::env;
use std::time::Duration;
use url::Url;

/// Default remote list of `host:port` candidates
pub const DEFAULT_PROXY_LIST_URL: &str =
    "https://raw.githubusercontent.com/claude89757/free_https_proxies/main/isz_https_proxies.txt";

/// Default liveness reference endpoint
pub const DEFAULT_PROBE_URL: &str = "https://ftty.ydmap.cn/srv100241/api/pub/sport/venue/getVenueOrderList?salesItemId=100341&curDate=1748188800000&venueGroupId=&t=1748187760876&type__1295=n4%2BxnDR70%3DK7wqWqY5DsD7fmKD54sO2g8S4rTD";

/// Body substrings that prove the probe reached the reference service
pub const DEFAULT_PROBE_MARKERS: &[&str] = &["签名", "验证"];

const DEFAULT_PROBE_HEADERS: &[(&str, &str)] = &[
    ("server-reflexive-ip", "1.1.1.1"),
    ("entry-tag", ""),
    ("access-token", ""),
    ("visitor-id", "xxxxxx"),
    ("user-agent", "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/107.0.0.0 Safari/537.36 NetType/WIFI MicroMessenger/6.8.0(0x16080000) MacWechat/3.8.10(0x13080a10) XWEB/1227 Flue"),
    ("accept", "application/json, text/plain, */*"),
    ("timestamp", "1748187760918"),
    ("signature", "xxxxxx"),
    ("tab-id", "ydmap_fb21e370a0f048acfef6a518e9952c02"),
    ("x-requested-with", "XMLHttpRequest"),
    ("cross-token", ""),
    ("sec-fetch-site", "same-origin"),
    ("sec-fetch-mode", "cors"),
    ("sec-fetch-dest", "empty"),
    ("referer", "https://ftty.ydmap.cn/booking/schedule/101332?salesItemId=100341"),
    ("accept-language", "zh-CN,zh;q=0.9"),
];

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Tunnel server configuration
    pub server: ServerConfig,
    /// Proxy pool configuration
    pub pool: PoolConfig,
    /// Liveness probe configuration
    pub probe: ProbeConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Port for the tunnel server (default: 10800)
    pub port: u16,
    /// Maximum concurrent client connections, 0 = unbounded
    pub max_connections: usize,
    /// Client request-head read timeout in seconds
    pub header_timeout: u64,
    /// Direct target connect timeout in seconds
    pub connect_timeout: u64,
    /// Upstream proxy connect and reply timeout in seconds
    pub upstream_timeout: u64,
    /// Relay idle timeout per direction in seconds, 0 = disabled
    pub idle_timeout: u64,
    /// Stats reporting interval in seconds
    pub stats_interval: u64,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Remote newline-delimited candidate list
    pub list_url: String,
    /// List fetch timeout in seconds
    pub fetch_timeout: u64,
    /// Refresh interval in seconds
    pub refresh_interval: u64,
    /// Fresh candidates probed per refresh cycle
    pub sample_size: usize,
    /// Concurrent probes per refresh cycle
    pub probe_workers: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Reference endpoint requested through each candidate
    pub url: String,
    /// Headers sent with every probe
    pub headers: Vec<(String, String)>,
    /// A probe passes iff the body contains any of these
    pub markers: Vec<String>,
    /// Per-probe timeout in seconds
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 10800,
            max_connections: 0,
            header_timeout: 30,
            connect_timeout: 10,
            upstream_timeout: 15,
            idle_timeout: 0,
            stats_interval: 60,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            list_url: DEFAULT_PROXY_LIST_URL.to_string(),
            fetch_timeout: 10,
            refresh_interval: 300,
            sample_size: 10,
            probe_workers: 10,
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_PROBE_URL.to_string(),
            headers: DEFAULT_PROBE_HEADERS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            markers: DEFAULT_PROBE_MARKERS.iter().map(|m| m.to_string()).collect(),
            timeout: 3,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let server_defaults = ServerConfig::default();
        let pool_defaults = PoolConfig::default();
        let probe_defaults = ProbeConfig::default();

        let probe_url = get_env_or("PROBE_URL", &probe_defaults.url);
        Url::parse(&probe_url).map_err(|e| {
            TunnelError::InvalidConfig(format!("PROBE_URL must be a valid URL: {}", e))
        })?;

        let list_url = get_env_or("POOL_LIST_URL", &pool_defaults.list_url);
        Url::parse(&list_url).map_err(|e| {
            TunnelError::InvalidConfig(format!("POOL_LIST_URL must be a valid URL: {}", e))
        })?;

        Ok(Config {
            server: ServerConfig {
                host: get_env_or("TUNNEL_HOST", &server_defaults.host),
                port: parse_env("TUNNEL_PORT", server_defaults.port)?,
                max_connections: parse_env(
                    "TUNNEL_MAX_CONNECTIONS",
                    server_defaults.max_connections,
                )?,
                header_timeout: parse_env("TUNNEL_HEADER_TIMEOUT", server_defaults.header_timeout)?
                    .max(1),
                connect_timeout: parse_env(
                    "TUNNEL_CONNECT_TIMEOUT",
                    server_defaults.connect_timeout,
                )?
                .max(1),
                upstream_timeout: parse_env(
                    "TUNNEL_UPSTREAM_TIMEOUT",
                    server_defaults.upstream_timeout,
                )?
                .max(1),
                idle_timeout: parse_env("TUNNEL_IDLE_TIMEOUT", server_defaults.idle_timeout)?,
                stats_interval: parse_env("TUNNEL_STATS_INTERVAL", server_defaults.stats_interval)?
                    .max(1),
            },
            pool: PoolConfig {
                list_url,
                fetch_timeout: parse_env("POOL_FETCH_TIMEOUT", pool_defaults.fetch_timeout)?
                    .max(1),
                refresh_interval: parse_env("POOL_REFRESH_INTERVAL", pool_defaults.refresh_interval)?
                    .max(1),
                sample_size: parse_env("POOL_SAMPLE_SIZE", pool_defaults.sample_size)?,
                probe_workers: parse_env("POOL_PROBE_WORKERS", pool_defaults.probe_workers)?
                    .max(1),
            },
            probe: ProbeConfig {
                url: probe_url,
                headers: parse_probe_headers()?.unwrap_or(probe_defaults.headers),
                markers: parse_probe_markers().unwrap_or(probe_defaults.markers),
                timeout: parse_env("PROBE_TIMEOUT", probe_defaults.timeout)?.max(1),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }

    /// Get the tunnel server address
    pub fn server_addr(&self) -> String {
        self.server.addr()
    }
}

impl ServerConfig {
    /// Get the listen address as `host:port`
    pub fn addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn header_timeout(&self) -> Duration {
        Duration::from_secs(self.header_timeout)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout > 0).then(|| Duration::from_secs(self.idle_timeout))
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval)
    }
}

impl PoolConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval)
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Parse `PROBE_HEADERS` as a JSON object of string values
fn parse_probe_headers() -> Result<Option<Vec<(String, String)>>> {
    let raw = env::var("PROBE_HEADERS").unwrap_or_default();
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    let map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(raw)
        .map_err(|e| TunnelError::InvalidConfig(format!("PROBE_HEADERS must be a JSON object: {}", e)))?;

    map.into_iter()
        .map(|(name, value)| match value {
            serde_json::Value::String(v) => Ok((name, v)),
            other => Err(TunnelError::InvalidConfig(format!(
                "PROBE_HEADERS value for {} must be a string, got {}",
                name, other
            ))),
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

/// Parse `PROBE_MARKERS` as a comma-separated list
fn parse_probe_markers() -> Option<Vec<String>> {
    let markers: Vec<String> = env::var("PROBE_MARKERS")
        .ok()?
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    (!markers.is_empty()).then_some(markers)
}

/// Parse a numeric environment variable, falling back to the default when unset
fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|_| {
            TunnelError::InvalidConfig(format!("{} must be a valid number", key))
        }),
        _ => Ok(default),
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
