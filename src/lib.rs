//! Tunnelpool - HTTP CONNECT tunnel proxy
//!
//! Accepts `CONNECT host:port` requests and relays opaque bytes to the target.
//!
//! ## Features
//!
//! - Direct connection to the target, falling back to an upstream HTTP proxy
//! - Self-refreshing pool of upstream candidates fetched from a remote list
//! - Liveness probing against a configurable reference endpoint
//! - Bidirectional relay with half-close support and exact byte accounting
//! - Optional concurrency ceiling and graceful shutdown

pub mod config;
pub mod error;
pub mod models;
pub mod proxy;
pub mod services;

pub use config::Config;
pub use error::{Result, TunnelError};
