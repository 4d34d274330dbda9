use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::broadcast::event_queue;
use crate::config::Settings;
use crate::error::{AppError, Result};
use crate::ingress::IngressListener;
use crate::shutdown::{GracefulShutdown, ShutdownConfig, ShutdownResult};
use crate::tasks::HeartbeatTask;

use super::{create_app, AppState};

/// How long to wait for each background task after shutdown was signalled
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Both listeners bound and ready to run
pub struct HubServer {
    state: AppState,
    public: TcpListener,
    ingress: TcpListener,
}

impl HubServer {
    /// Bind the public and ingress listeners.
    ///
    /// Either bind failing is fatal at startup.
    pub async fn bind(settings: Settings) -> Result<Self> {
        let ingress = IngressListener::bind(&settings.ingress).await?;

        let public_addr = settings.server_addr();
        let public = TcpListener::bind(&public_addr)
            .await
            .map_err(|source| AppError::Bind {
                addr: public_addr,
                source,
            })?;

        Ok(Self {
            state: AppState::new(settings),
            public,
            ingress,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn public_addr(&self) -> Result<SocketAddr> {
        Ok(self.public.local_addr()?)
    }

    pub fn ingress_addr(&self) -> Result<SocketAddr> {
        Ok(self.ingress.local_addr()?)
    }

    /// Serve until `shutdown` resolves, then shut down gracefully
    pub async fn run<F>(self, shutdown: F) -> Result<ShutdownResult>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Self {
            state,
            public,
            ingress,
        } = self;
        let settings = state.settings.clone();

        let (shutdown_tx, _) = broadcast::channel::<()>(4);
        let (events_tx, events_rx) = event_queue(settings.ingress.queue_capacity);

        tracing::info!(
            public = ?public.local_addr().ok(),
            ingress = ?ingress.local_addr().ok(),
            "Event hub listening"
        );

        // Single consumer of the event queue
        let broadcaster_handle = tokio::spawn(
            state
                .broadcaster
                .clone()
                .run(events_rx, shutdown_tx.subscribe()),
        );

        let ingress_listener = IngressListener::new(
            settings.ingress.clone(),
            events_tx,
            state.ingress_stats.clone(),
        );
        let ingress_handle = tokio::spawn(ingress_listener.run(ingress, shutdown_tx.subscribe()));

        let heartbeat_task = HeartbeatTask::new(
            settings.websocket.clone(),
            state.registry.clone(),
            shutdown_tx.subscribe(),
        );
        let heartbeat_handle = tokio::spawn(async move {
            heartbeat_task.run().await;
        });

        let registry = state.registry.clone();
        let app = create_app(state);
        let mut server_shutdown = shutdown_tx.subscribe();
        let server_handle: JoinHandle<std::io::Result<()>> = tokio::spawn(async move {
            axum::serve(
                public,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.recv().await;
            })
            .await
        });

        shutdown.await;

        let graceful = GracefulShutdown::with_config(
            registry,
            shutdown_tx,
            ShutdownConfig::from(&settings.shutdown),
        );
        let result = graceful.execute("server shutting down").await;

        tracing::info!("Waiting for background tasks to finish...");
        join_task("broadcaster", broadcaster_handle).await;
        join_task("ingress", ingress_handle).await;
        join_task("heartbeat", heartbeat_handle).await;

        match tokio::time::timeout(TASK_JOIN_TIMEOUT, server_handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => return Err(AppError::Io(e)),
            Ok(Err(e)) => return Err(AppError::Internal(format!("server task failed: {e}"))),
            Err(_) => tracing::warn!("Public listener did not stop in time"),
        }

        tracing::info!("Event hub stopped");
        Ok(result)
    }
}

async fn join_task(name: &str, handle: JoinHandle<()>) {
    match tokio::time::timeout(TASK_JOIN_TIMEOUT, handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(task = name, error = %e, "Background task failed"),
        Err(_) => tracing::warn!(task = name, "Background task did not stop in time"),
    }
}
