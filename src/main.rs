//! API aggregator server.
//!
//! ```text
//!     GET/POST /api/aggregate
//!         │
//!         ▼
//!   ┌──────────────┐      ┌─────────────────────────────────────────────┐
//!   │ http server  │─────▶│ aggregation engine (fan-out + deadlines)    │
//!   └──────────────┘      └──────┬──────────────────────────────────────┘
//!                                │ one per upstream
//!                                ▼
//!                  ┌───────────────────────────────────┐
//!                  │ upstream client                   │
//!                  │  circuit breaker → response cache │──────▶ upstream HTTP APIs
//!                  │  → rate limiter → retrier         │
//!                  └───────────────────────────────────┘
//!                                │ successful batch
//!                                ▼
//!                  ┌───────────────────────────────────┐
//!                  │ offload pool (worker threads)     │
//!                  └───────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use api_aggregator::config::loader::load_config;
use api_aggregator::observability::logging::{self, LogFormat};
use api_aggregator::observability::metrics;
use api_aggregator::{AggregatorConfig, HttpServer, Runtime};

#[derive(Debug, Parser)]
#[command(name = "api-aggregator")]
#[command(about = "Resilient multi-upstream HTTP aggregator", long_about = None)]
struct Cli {
    /// TOML configuration file; built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address.
    #[arg(short, long)]
    bind: Option<String>,

    /// Override the log level.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AggregatorConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }

    logging::init(
        &config.observability.log_level,
        LogFormat::parse(&config.observability.log_format),
    );
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "api-aggregator starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    let runtime = Arc::new(Runtime::build(config)?);
    let server = HttpServer::new(runtime.clone());
    let server_shutdown = runtime.subscribe_shutdown();

    let signal_runtime = runtime.clone();
    tokio::spawn(async move {
        api_aggregator::lifecycle::signals::wait_for_signal().await;
        signal_runtime.request_shutdown();
    });

    server.run(listener, server_shutdown).await?;
    runtime.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
