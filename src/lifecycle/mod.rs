//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Build shared services → Start sweeper → Serve
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Stop sweeper → Join offload workers → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core services, then the listener
//! - Ordered shutdown: stop accept, then background tasks, then threads

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{Runtime, StartupError};
