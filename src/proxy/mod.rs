//! Tunnel proxy implementation
//!
//! This module provides:
//! - CONNECT request parsing and per-connection handling
//! - Direct and chained (upstream CONNECT) target resolution
//! - The bidirectional relay
//! - The upstream candidate pool with its list source and liveness prober

pub mod handler;
pub mod health;
pub mod pool;
pub mod request;
pub mod server;
pub mod source;
pub mod transport;
pub mod tunnel;

pub use handler::{ConnectionHandler, HandlerConfig};
pub use health::{HttpProber, ProbeOutcome, ProxyProber};
pub use pool::{PoolSnapshot, ProxyPool, ProxySelector, RefreshOutcome};
pub use request::ConnectRequest;
pub use server::TunnelServer;
pub use source::{HttpProxySource, ProxySource};
pub use transport::ProxyTransport;
pub use tunnel::{RelayConfig, TunnelSession};
