//! Rate limiting subsystem.
//!
//! # Data Flow
//! ```text
//! Upstream request:
//!     → limiter.rs (resolve class from name prefix, default class otherwise)
//!     → wait for a concurrency slot (woken on release, no polling)
//!     → bucket.rs (take one token, sleeping for the deficit if short)
//!     → run the request, release the slot on every exit path
//! ```
//!
//! # Design Decisions
//! - Requests are delayed, never rejected
//! - Buckets refill lazily on access; no background ticker
//! - Limits are per class so related endpoints share one budget

pub mod bucket;
pub mod limiter;

pub use bucket::TokenBucket;
pub use limiter::RateLimiter;
