//! Connection registry for subscriber connections
//!
//! This module provides:
//! - Connection handles with a per-connection outbound queue
//! - The lock-guarded membership set used by the broadcaster
//! - Idle detection and socket lifetime accounting

mod handle;
mod manager;
mod stats;

pub use handle::{ConnectionHandle, SendError};
pub use manager::{ConnectionRegistry, SocketGuard};
pub use stats::RegistryStats;
