//! Aggregation subsystem.
//!
//! # Data Flow
//! ```text
//! aggregate(strategy, timeout):
//!     → engine.rs (one detached fetch per upstream, each with its own deadline)
//!     → outcome.rs (ordered per-upstream results, failures kept as data)
//!     → strategy.rs:
//!         - best-effort (every success, failures listed)
//!         - all-or-nothing (any failure fails the batch)
//!         - cached-fallback (recent success substitutes a failed slot)
//!     → optional offload of the successful batch (failure keeps raw data)
//! ```
//!
//! # Design Decisions
//! - One upstream's failure never aborts the fan-out
//! - The fallback store is an injected service, not strategy-global state
//! - Strategies are stateless apart from that store

pub mod engine;
pub mod outcome;
pub mod strategy;

pub use engine::AggregationEngine;
pub use outcome::{AggregateData, AggregateOutcome, AggregationError, AggregationReport, FailedApi};
pub use strategy::{AggregationStrategy, FallbackCache, StrategyKind};
