//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration
//! - Build shared services in dependency order: cache, rate limiter,
//!   HTTP client, upstream clients, offload pool, engine
//! - Start background tasks (cache sweeper)
//! - Release timers and threads on shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Shared services are constructed once and injected, never looked up globally

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::aggregation::{AggregationEngine, FallbackCache};
use crate::cache::ResponseCache;
use crate::config::validation::{validate_config, ValidationError};
use crate::config::AggregatorConfig;
use crate::lifecycle::Shutdown;
use crate::offload::OffloadPool;
use crate::rate_limit::RateLimiter;
use crate::resilience::BackoffRetrier;
use crate::upstream::{build_http_client, ClientDeps, UpstreamClient, UpstreamDescriptor};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {}", join(.0))]
    Invalid(Vec<ValidationError>),

    #[error("upstream '{name}' has an invalid URL: {source}")]
    UpstreamUrl {
        name: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("failed to start offload workers: {0}")]
    Offload(#[from] std::io::Error),
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Every long-lived service of a running aggregator.
pub struct Runtime {
    pub config: AggregatorConfig,
    pub cache: Arc<ResponseCache>,
    pub limiter: Arc<RateLimiter>,
    pub offload: Option<Arc<OffloadPool>>,
    pub engine: Arc<AggregationEngine>,
    shutdown: Shutdown,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Runtime {
    /// Build all services. Must be called inside a Tokio runtime.
    pub fn build(config: AggregatorConfig) -> Result<Self, StartupError> {
        validate_config(&config).map_err(StartupError::Invalid)?;

        let shutdown = Shutdown::new();
        let cache = Arc::new(ResponseCache::new(&config.cache));
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        let deps = ClientDeps {
            cache: cache.clone(),
            limiter: limiter.clone(),
            retrier: BackoffRetrier::from_config(&config.retries),
            http: build_http_client(&config.http_client)?,
        };

        let mut clients = Vec::with_capacity(config.upstreams.0.len());
        for upstream in &config.upstreams.0 {
            let descriptor = UpstreamDescriptor::from_config(upstream, cache.default_ttl()).map_err(|source| {
                StartupError::UpstreamUrl {
                    name: upstream.name.clone(),
                    source,
                }
            })?;
            clients.push(Arc::new(UpstreamClient::new(
                descriptor,
                &config.circuit_breaker,
                deps.clone(),
            )));
        }

        let fallback = Arc::new(FallbackCache::new(Duration::from_millis(
            config.aggregation.fallback_ttl_ms,
        )));
        let mut engine = AggregationEngine::new(clients, fallback)
            .with_default_timeout(Duration::from_millis(config.aggregation.default_timeout_ms));

        let offload = if config.aggregation.offload_enabled {
            let pool = Arc::new(OffloadPool::new(config.offload.workers)?);
            engine = engine.with_offload(pool.clone());
            Some(pool)
        } else {
            None
        };

        let sweeper = cache.spawn_sweeper(
            Duration::from_millis(config.cache.sweep_interval_ms),
            shutdown.subscribe(),
        );

        tracing::info!(
            upstreams = config.upstreams.0.len(),
            cache_max_size = config.cache.max_size,
            offload_workers = offload.as_ref().map(|_| config.offload.workers).unwrap_or(0),
            "runtime initialized"
        );

        Ok(Self {
            config,
            cache,
            limiter,
            offload,
            engine: Arc::new(engine),
            shutdown,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    pub fn subscribe_shutdown(&self) -> tokio::sync::broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// Signal every subscriber (HTTP server, sweeper) to stop.
    pub fn request_shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Stop the cache sweeper and join the offload workers.
    pub async fn shutdown(&self) {
        tracing::info!("shutting down runtime");
        self.shutdown.trigger();

        let sweeper = self.sweeper.lock().expect("sweeper mutex poisoned").take();
        if let Some(handle) = sweeper {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "cache sweeper ended abnormally");
            }
        }

        if let Some(pool) = self.offload.clone() {
            if let Err(e) = tokio::task::spawn_blocking(move || pool.shutdown()).await {
                tracing::warn!(error = %e, "offload pool shutdown failed");
            }
        }
        tracing::info!("runtime stopped");
    }
}
