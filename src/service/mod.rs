//! Service lifecycle management.
//!
//! Provides the main service runner with signal handling and graceful
//! shutdown.

use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::api;
use crate::backend::create_backend;
use crate::config::FlowConfig;
use crate::deployment::DeploymentController;
use crate::error::{FlowError, FlowResult};
use crate::history::ReleaseHistory;
use crate::registry::StreamRegistry;
use crate::store::{FlowStore, MemoryStore, PostgresStore};

/// The control plane service.
///
/// Manages the lifecycle of the control plane, including:
/// - Database connections
/// - Deploy backend
/// - HTTP API server
/// - Signal handling and graceful shutdown
pub struct FlowService {
    config: FlowConfig,
    cancel: CancellationToken,
}

impl FlowService {
    /// Create a new service with the given configuration.
    #[must_use]
    pub fn new(config: FlowConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Run the service.
    ///
    /// This will:
    /// 1. Connect to the database (or use the in-memory store as fallback)
    /// 2. Create the deploy backend
    /// 3. Create the registry, history and controller
    /// 4. Start the HTTP API server
    /// 5. Wait for shutdown signal
    pub async fn run(&self) -> FlowResult<()> {
        let store = self.create_store().await;

        let backend = create_backend(&self.config.backend)?;
        info!(kind = ?self.config.backend.kind, "deploy backend configured");

        let registry = Arc::new(StreamRegistry::new(
            Arc::clone(&store),
            self.config.deployment.max_page_size,
        ));
        let history = Arc::new(ReleaseHistory::new(Arc::clone(&store)));

        let controller = Arc::new(DeploymentController::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&history),
            backend,
            self.config.deployment.clone(),
        ));
        info!("deployment controller initialised");

        let state = api::AppState {
            controller,
            registry,
            history,
            store,
        };

        let app = api::router(state);

        info!(addr = %self.config.server.listen_addr, "control plane listening");

        let listener = tokio::net::TcpListener::bind(self.config.server.listen_addr)
            .await
            .map_err(|e| FlowError::Config(format!("failed to bind TCP: {e}")))?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(self.cancel.clone()))
            .await
            .map_err(|e| FlowError::Config(format!("server error: {e}")))?;

        info!("control plane shutdown complete");
        Ok(())
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn create_store(&self) -> Arc<dyn FlowStore> {
        match PostgresStore::new(&self.config.database.url).await {
            Ok(store) => {
                info!(url = %self.config.database.url, "connected to PostgreSQL");
                Arc::new(store)
            }
            Err(e) => {
                error!(
                    error = %e,
                    "failed to connect to PostgreSQL, using in-memory store"
                );
                Arc::new(MemoryStore::new())
            }
        }
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("received SIGTERM, initiating shutdown");
        }
        () = cancel.cancelled() => {
            info!("shutdown requested");
        }
    }
}
