//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Upstream fetch:
//!     → circuit_breaker.rs (fail fast while open, probe when cooled down)
//!     → retries.rs (classify failure, retry with backoff.rs delays)
//!     → timeouts.rs (fan-out deadline, abandon without cancelling)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every fan-out slot has a deadline
//! - Full jitter decorrelates concurrent retriers
//! - Circuit breaker prevents cascading failures

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use retries::{BackoffRetrier, Retryable};
