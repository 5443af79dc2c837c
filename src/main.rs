//! Caching HTTP/1.1 Reverse Proxy
//!
//! Forwards every request to one fixed upstream, answers repeat `GET`s from an
//! in-memory TTL cache, and gzips bodies for clients that accept it.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │                    CACHING PROXY                     │
//!                    │                                                      │
//!   Client Request   │  ┌──────────┐   ┌──────────┐   ┌─────────────────┐   │
//!   ─────────────────┼─▶│   net    │──▶│ session  │──▶│  http::codec    │   │
//!                    │  │ listener │   │  (cycle) │   │ parse_request   │   │
//!                    │  └──────────┘   └──────────┘   └────────┬────────┘   │
//!                    │                                         ▼            │
//!                    │                 ┌──────────┐  hit ┌───────────┐      │
//!                    │                 │  cache   │◀────▶│  server   │      │
//!                    │                 │  actor   │      │  cycle    │      │
//!                    │                 └──────────┘      └─────┬─────┘      │
//!                    │                                    miss │            │
//!                    │                                         ▼            │
//!   Client Response  │  ┌─────────────┐   ┌─────────────┐  ┌──────────┐     │
//!   ◀────────────────┼──│ serialize   │◀──│ compression │◀─│ upstream │◀────┼── Upstream
//!                    │  └─────────────┘   └─────────────┘  └──────────┘     │
//!                    └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use caching_proxy::config::{resolve_config, ConfigError, ConfigOverrides, ProxyConfig};
use caching_proxy::lifecycle::{signals, Shutdown};
use caching_proxy::net::Listener;
use caching_proxy::observability::{logging, metrics};
use caching_proxy::ProxyServer;

#[derive(Parser, Debug)]
#[command(name = "caching-proxy")]
#[command(about = "HTTP/1.1 reverse proxy with response caching and gzip", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override listener.bind_address.
    #[arg(short, long)]
    listen: Option<String>,

    /// Override upstream.address.
    #[arg(short, long)]
    upstream: Option<String>,

    /// Override observability.log_level.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn into_config(self) -> Result<ProxyConfig, ConfigError> {
        let overrides = ConfigOverrides {
            bind_address: self.listen,
            upstream: self.upstream,
            log_level: self.log_level,
        };
        resolve_config(self.config.as_deref(), &overrides)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Cli::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("caching-proxy: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init(&config.observability) {
        eprintln!("caching-proxy: failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    tracing::info!("caching-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.address,
        cache_enabled = config.cache.enabled,
        compression_enabled = config.compression.enabled,
        idle_timeout_secs = config.timeouts.idle_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = match Listener::bind(&config.listener) {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, "Cannot start listener");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    signals::spawn_signal_listener(shutdown.clone());

    let server = ProxyServer::new(config);
    if let Err(e) = server.run(listener, server_shutdown).await {
        tracing::error!(error = %e, "Proxy server failed");
        return ExitCode::FAILURE;
    }

    tracing::info!("Shutdown complete");
    ExitCode::SUCCESS
}
