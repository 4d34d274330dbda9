use std::sync::Arc;
use std::time::Instant;

use crate::broadcast::Broadcaster;
use crate::config::Settings;
use crate::ingress::IngressStats;
use crate::registry::ConnectionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: Arc<Broadcaster>,
    pub ingress_stats: Arc<IngressStats>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(registry.clone()));

        Self {
            settings: Arc::new(settings),
            registry,
            broadcaster,
            ingress_stats: Arc::new(IngressStats::default()),
            start_time: Instant::now(),
        }
    }
}
