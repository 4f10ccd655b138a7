//! Resilient multi-upstream API aggregator.
//!
//! Fans out to many unreliable HTTP upstreams and reconciles their partial
//! results, protected by per-upstream circuit breakers, per-class rate
//! limits, a coalescing TTL/LRU response cache and jittered retries.

pub mod aggregation;
pub mod cache;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod offload;
pub mod rate_limit;
pub mod resilience;
pub mod upstream;

pub use aggregation::{AggregationEngine, StrategyKind};
pub use config::AggregatorConfig;
pub use http::HttpServer;
pub use lifecycle::{Runtime, Shutdown};
