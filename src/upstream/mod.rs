//! Upstream subsystem.
//!
//! # Data Flow
//! ```text
//! fetch():
//!     → circuit breaker open? serve any cached payload as stale, else fail
//!     → cache.coalesce (hit, or join/start one fetch per key)
//!         → rate limiter (class slot + token)
//!         → retrier (backoff between attempts)
//!         → make_request (GET, per-request timeout, 2xx + JSON required)
//!         → descriptor shaping
//!     → record success/failure on the breaker
//! ```
//!
//! # Design Decisions
//! - Cache and rate limiter are shared services injected into every client
//! - One pooled reqwest client serves every upstream
//! - Errors are `Clone` so coalesced callers share one failure

pub mod client;
pub mod descriptor;
pub mod types;

pub use client::{build_http_client, ClientDeps, UpstreamClient};
pub use descriptor::{ShapeRule, UpstreamDescriptor};
pub use types::{UpstreamError, UpstreamResponse, UpstreamResult};
