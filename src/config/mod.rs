//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AggregatorConfig (validated, immutable)
//!     → handed to lifecycle::startup to build the services
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::AggregatorConfig;
pub use schema::CacheConfig;
pub use schema::CircuitBreakerConfig;
pub use schema::ClassLimit;
pub use schema::RateLimitConfig;
pub use schema::RetryConfig;
pub use schema::UpstreamConfig;
