//! Tunnelpool - Entry Point
//!
//! Starts the tunnel server and the pool refresher with graceful shutdown support.

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tunnelpool::config::{Config, LogConfig};
use tunnelpool::error::Result;
use tunnelpool::models::ServerStats;
use tunnelpool::proxy::{HttpProber, HttpProxySource, ProxyPool, TunnelServer};
use tunnelpool::services::{PoolRefreshService, ServiceHandle, StatsReporter};

#[derive(Parser)]
#[command(name = "tunnelpool", version)]
#[command(about = "HTTP CONNECT tunnel proxy with a self-refreshing upstream pool", long_about = None)]
struct Cli {
    /// Listen host (overrides TUNNEL_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides TUNNEL_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Maximum concurrent connections, 0 = unbounded (overrides TUNNEL_MAX_CONNECTIONS)
    #[arg(long)]
    max_connections: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(max_connections) = cli.max_connections {
        config.server.max_connections = max_connections;
    }

    init_tracing(&config.log);
    info!("Starting tunnelpool");

    // Proxy pool
    let source = Arc::new(HttpProxySource::new(
        config.pool.list_url.clone(),
        config.pool.fetch_timeout(),
    )?);
    let prober = Arc::new(HttpProber::new(config.probe.clone())?);
    // First refresh completes before the server can ask for a candidate.
    let pool = Arc::new(
        ProxyPool::start(
            source,
            prober,
            config.pool.sample_size,
            config.pool.probe_workers,
        )
        .await,
    );

    let stats = Arc::new(ServerStats::new());
    let server = TunnelServer::new(config.server.clone(), pool.clone(), stats.clone());

    let listener = match server.bind().await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", config.server_addr(), e);
            return Err(e);
        }
    };
    info!("Configure clients with proxy http://{}", config.server_addr());
    if config.server.max_connections > 0 {
        info!("Connection ceiling: {}", config.server.max_connections);
    }

    let (handle, server_shutdown) = ServiceHandle::new();

    // Start pool refresher
    let refresh_service = PoolRefreshService::new(pool.clone(), config.pool.refresh_interval());
    let refresh_shutdown = handle.subscribe();
    let refresh_task = tokio::spawn(async move {
        refresh_service.run(refresh_shutdown).await;
    });

    // Start stats reporter
    let reporter = StatsReporter::new(stats, pool, config.server.stats_interval());
    let reporter_shutdown = handle.subscribe();
    let reporter_task = tokio::spawn(async move {
        reporter.run(reporter_shutdown).await;
    });

    let server_task = tokio::spawn(async move {
        if let Err(e) = server.serve(listener, server_shutdown).await {
            error!("Tunnel server error: {}", e);
        }
    });

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    handle.shutdown();
    let _ = tokio::join!(server_task, refresh_task, reporter_task);

    info!("Tunnelpool stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tunnelpool={}", log.level)));
    let registry = tracing_subscriber::registry().with(filter);

    if log.format.eq_ignore_ascii_case("json") {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
