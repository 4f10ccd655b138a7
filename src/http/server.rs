//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (tracing, timeout, request ID)
//! - Serve on a bound listener until shutdown is signalled

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::http::handlers::{self, AppState};
use crate::http::request::request_id;
use crate::http::stats::RequestStats;
use crate::lifecycle::Runtime;

/// HTTP surface of the aggregator.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        let timeout = Duration::from_secs(runtime.config.server.request_timeout_secs);
        let state = AppState {
            runtime,
            stats: Arc::new(RequestStats::new()),
            started: Instant::now(),
        };
        Self {
            router: Self::build_router(state, timeout),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(state: AppState, timeout: Duration) -> Router {
        Router::new()
            .route("/health", get(handlers::health))
            .route(
                "/api/aggregate",
                get(handlers::aggregate_default).post(handlers::aggregate_custom),
            )
            .route("/api/stats", get(handlers::stats))
            .with_state(state)
            .layer(TimeoutLayer::new(timeout))
            .layer(axum::middleware::from_fn(request_id))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until a shutdown signal arrives, then drain in-flight requests.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server received shutdown signal");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
