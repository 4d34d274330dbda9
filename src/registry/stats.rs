//! Registry statistics

use serde::Serialize;

/// Connection statistics
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    /// Connections currently eligible for broadcasts
    pub total_connections: usize,
    /// Subscriber socket tasks still running (includes connections being closed)
    pub active_sockets: usize,
}
