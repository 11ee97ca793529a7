//! HTTP API for the control plane.
//!
//! Provides endpoints for:
//! - Stream definition management (create, list, get, destroy)
//! - Deployment lifecycle (deploy, undeploy, update, rollback)
//! - Release history and manifest retrieval
//! - Health and readiness checks
//! - Prometheus metrics

mod deployments;
mod streams;

use std::fmt::Write as _;
use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::deployment::DeploymentController;
use crate::history::ReleaseHistory;
use crate::registry::StreamRegistry;
use crate::store::FlowStore;

pub use deployments::{DeployRequest, ReleaseResponse, UpdateStreamRequest};
pub use streams::{CreateStreamRequest, PagedStreamsResponse, StreamDefinitionResponse};

/// Shared application state for the control plane API.
#[derive(Clone)]
pub struct AppState {
    /// Lifecycle controller.
    pub controller: Arc<DeploymentController>,
    /// Stream definition registry.
    pub registry: Arc<StreamRegistry>,
    /// Release history.
    pub history: Arc<ReleaseHistory>,
    /// Store for direct read queries.
    pub store: Arc<dyn FlowStore>,
}

/// Creates the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        // Stream definitions
        .route("/streams", post(streams::create_stream))
        .route("/streams", get(streams::list_streams))
        .route("/streams", delete(streams::destroy_all))
        .route("/streams/{name}", get(streams::get_stream))
        .route("/streams/{name}", delete(streams::destroy_stream))
        // Deployment lifecycle
        .route("/deployments", delete(deployments::undeploy_all))
        .route("/deployments/{name}", post(deployments::deploy_stream))
        .route("/deployments/{name}", delete(deployments::undeploy_stream))
        .route("/deployments/update/{name}", post(deployments::update_stream))
        .route(
            "/deployments/rollback/{name}/{version}",
            post(deployments::rollback_stream),
        )
        // Release history
        .route(
            "/deployments/manifest/{name}",
            get(deployments::get_manifest_latest),
        )
        .route(
            "/deployments/manifest/{name}/{version}",
            get(deployments::get_manifest),
        )
        .route(
            "/deployments/history/{name}",
            get(deployments::get_history),
        )
        .route(
            "/deployments/history/{name}/{max_revisions}",
            get(deployments::get_history_truncated),
        )
        // Metrics
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> axum::Json<HealthResponse> {
    axum::Json(HealthResponse { status: "healthy" })
}

/// Readiness check endpoint.
async fn readiness_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> (axum::http::StatusCode, axum::Json<ReadyResponse>) {
    match state.store.list_definitions(Some(1)).await {
        Ok(page) => (
            axum::http::StatusCode::OK,
            axum::Json(ReadyResponse {
                ready: true,
                streams: page.total,
            }),
        ),
        Err(_) => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(ReadyResponse {
                ready: false,
                streams: 0,
            }),
        ),
    }
}

/// Metrics endpoint.
async fn metrics(axum::extract::State(state): axum::extract::State<AppState>) -> String {
    use crate::types::DeploymentStatus;

    let mut output = String::new();

    output.push_str("# HELP flowplane_streams_total Number of defined streams\n");
    output.push_str("# TYPE flowplane_streams_total gauge\n");
    let total = state
        .store
        .list_definitions(Some(1))
        .await
        .map(|page| page.total)
        .unwrap_or(0);
    let _ = writeln!(output, "flowplane_streams_total {total}");

    output.push_str("# HELP flowplane_deployments_total Number of deployments by status\n");
    output.push_str("# TYPE flowplane_deployments_total gauge\n");

    let mut counts = [
        (DeploymentStatus::Undeployed, 0_u64),
        (DeploymentStatus::Deploying, 0),
        (DeploymentStatus::Deployed, 0),
        (DeploymentStatus::Updating, 0),
        (DeploymentStatus::Failed, 0),
    ];

    if let Ok(names) = state.registry.names().await {
        for name in names {
            if let Ok(Some(record)) = state.store.get_deployment(&name).await {
                for (status, count) in &mut counts {
                    if *status == record.status {
                        *count += 1;
                    }
                }
            }
        }
    }

    for (status, count) in counts {
        let _ = writeln!(
            output,
            "flowplane_deployments_total{{status=\"{}\"}} {count}",
            status.as_str()
        );
    }

    output
}

/// Health response.
#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Readiness response.
#[derive(serde::Serialize)]
struct ReadyResponse {
    ready: bool,
    streams: u64,
}
