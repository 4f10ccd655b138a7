//! Thin HTTP surface over the aggregation engine.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum router, trace + request ID + timeout layers)
//!     → handlers.rs:
//!         GET  /health          liveness and uptime
//!         GET  /api/aggregate   best-effort, configured timeout
//!         POST /api/aggregate   {strategy, timeout}
//!         GET  /api/stats       request stats, circuits, cache, limiter, pool
//!     → stats.rs (request totals, running mean latency)
//! ```

pub mod handlers;
pub mod request;
pub mod server;
pub mod stats;

pub use request::{RequestId, X_REQUEST_ID};
pub use server::HttpServer;
