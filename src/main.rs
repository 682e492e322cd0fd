//! Pool proxy daemon.
//!
//! A transparent reverse proxy between storage-protocol clients and a
//! backend pool. The proxy relays the binary, length-framed wire protocol,
//! decoding only the three negotiation messages, and coordinates TLS
//! activation independently on each leg.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────┐
//!                      │                  POOL PROXY                  │
//!                      │                                              │
//!   Client ───────────▶│  net/listener ──▶ session (one task)         │
//!                      │                     ├─ ClientLeg ◀──▶ wire   │
//!                      │                     ├─ PoolLeg   ◀──▶ wire   │──▶ Pool
//!                      │                     └─ fault boundary        │
//!                      │                                              │
//!                      │  cross-cutting: config · tls · observability │
//!                      │                  · lifecycle                 │
//!                      └──────────────────────────────────────────────┘
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use pool_proxy::config::loader::load_config;
use pool_proxy::config::validation::split_host_port;
use pool_proxy::config::ProxyConfig;
use pool_proxy::observability;
use pool_proxy::tls::TlsGate;
use pool_proxy::SessionListener;

#[derive(Parser, Debug)]
#[command(name = "pool-proxy", about = "Storage pool reverse proxy")]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    observability::logging::init("pool_proxy=debug");

    tracing::info!("pool-proxy v0.1.0 starting");

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    tracing::info!(
        pool = %config.pool.address,
        port_range_start = config.listener.port_range_start,
        port_range_end = config.listener.port_range_end,
        response_timeout_secs = config.timeouts.response_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            observability::metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let pool_host = split_host_port(&config.pool.address)
        .map(|(host, _)| host.to_string())
        .unwrap_or_else(|| config.pool.address.clone());
    let gate = Arc::new(TlsGate::from_config(&config.tls, &pool_host)?);

    let listener = SessionListener::start(
        Arc::new(config),
        gate,
        IpAddr::V4(Ipv4Addr::UNSPECIFIED),
    )
    .await?;

    tracing::info!(
        address = %listener.bound_address(),
        proxy_id = %listener.proxy_id(),
        "Listening for redirected sessions"
    );

    tokio::signal::ctrl_c().await?;
    listener.shutdown();

    tracing::info!("Shutdown complete");
    Ok(())
}
