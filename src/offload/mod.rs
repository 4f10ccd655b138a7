//! Offload subsystem for CPU-bound post-processing.
//!
//! # Data Flow
//! ```text
//! execute(task):
//!     → serialize task to JSON
//!     → idle worker? send on its channel : push onto the FIFO queue
//!     → worker thread: tasks.rs (aggregate | transform | filter | echo)
//!     → serialized result back over a oneshot channel
//!     → worker picks up the next queued job or returns to the idle set
//! ```
//!
//! # Design Decisions
//! - Workers are OS threads so CPU work never blocks the async runtime
//! - A crashed worker is removed, not respawned; capacity shrinks
//! - No priorities; strict submission order under saturation

pub mod pool;
pub mod tasks;

pub use pool::{OffloadError, OffloadPool, PoolStats};
pub use tasks::{OffloadTask, TaskKind};
