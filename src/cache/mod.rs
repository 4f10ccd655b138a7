//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! Upstream fetch:
//!     → key.rs (owner + serialized params)
//!     → coalesce.rs (join an identical in-flight fetch, or start one)
//!     → store.rs (fresh hit answers; miss fetches and stores)
//!     → on fetch failure, any entry for the key is served as stale
//! ```
//!
//! # Design Decisions
//! - One process-wide cache shared by every upstream client
//! - Expiry is lazy on access plus a periodic sweep
//! - Eviction removes exactly one least-recently-accessed entry

pub mod coalesce;
pub mod key;
pub mod store;

pub use store::{CacheLookup, CacheStats, ResponseCache};
