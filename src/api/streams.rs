//! Stream definition endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::FlowError;
use crate::types::{BatchReport, StreamDefinition, StreamName};

use super::AppState;

/// Request to create a new stream.
#[derive(Debug, Deserialize)]
pub struct CreateStreamRequest {
    /// Unique stream name.
    pub name: String,
    /// DSL pipeline description.
    pub definition: String,
    /// Whether to deploy the stream immediately after creation.
    #[serde(default)]
    pub deploy: bool,
}

/// Query parameters for listing streams.
#[derive(Debug, Default, Deserialize)]
pub struct ListStreamsQuery {
    /// Maximum number of results.
    pub size: Option<u32>,
}

/// Response for a stream definition.
#[derive(Debug, Serialize)]
pub struct StreamDefinitionResponse {
    /// Stream name.
    pub name: String,
    /// DSL pipeline description.
    pub definition: String,
    /// Creation timestamp.
    pub created_at: String,
}

/// Response for a paged stream listing.
#[derive(Debug, Serialize)]
pub struct PagedStreamsResponse {
    /// Definitions in stable insertion order.
    pub items: Vec<StreamDefinitionResponse>,
    /// Total number of defined streams.
    pub total: u64,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub(super) fn into_api_error(error: &FlowError) -> ApiError {
    (
        error_to_status(error),
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

pub(super) const fn error_to_status(error: &FlowError) -> StatusCode {
    match error {
        FlowError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
        FlowError::StreamNotFound { .. } | FlowError::ReleaseNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        FlowError::DuplicateStream { .. }
        | FlowError::Conflict { .. }
        | FlowError::ConcurrentModification { .. } => StatusCode::CONFLICT,
        FlowError::InvalidVersion { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        FlowError::DeployFailed { .. } | FlowError::UpdateFailed { .. } => StatusCode::BAD_GATEWAY,
        FlowError::Config(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(super) fn definition_to_response(definition: StreamDefinition) -> StreamDefinitionResponse {
    StreamDefinitionResponse {
        name: definition.name.to_string(),
        definition: definition.definition,
        created_at: definition.created_at.to_rfc3339(),
    }
}

/// Create a new stream, optionally deploying it.
pub async fn create_stream(
    State(state): State<AppState>,
    Json(request): Json<CreateStreamRequest>,
) -> Result<(StatusCode, Json<StreamDefinitionResponse>), ApiError> {
    if request.definition.trim().is_empty() {
        return Err(into_api_error(&FlowError::invalid_argument(
            "create",
            "definition cannot be empty",
        )));
    }
    let name = StreamName::new(&request.name).map_err(|e| into_api_error(&e))?;

    info!(stream = %name, deploy = request.deploy, "creating stream via API");

    let definition = state
        .controller
        .create_stream(name, request.definition, request.deploy)
        .await
        .map_err(|e| into_api_error(&e))?;

    Ok((StatusCode::CREATED, Json(definition_to_response(definition))))
}

/// List stream definitions.
pub async fn list_streams(
    State(state): State<AppState>,
    Query(query): Query<ListStreamsQuery>,
) -> Result<Json<PagedStreamsResponse>, ApiError> {
    let page = state
        .registry
        .list(query.size)
        .await
        .map_err(|e| into_api_error(&e))?;

    Ok(Json(PagedStreamsResponse {
        items: page.items.into_iter().map(definition_to_response).collect(),
        total: page.total,
    }))
}

/// Get a stream definition by name.
pub async fn get_stream(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<StreamDefinitionResponse>, ApiError> {
    let name = StreamName::new(&name).map_err(|e| into_api_error(&e))?;

    let definition = state
        .registry
        .lookup(&name)
        .await
        .map_err(|e| into_api_error(&e))?;

    Ok(Json(definition_to_response(definition)))
}

/// Destroy a stream.
pub async fn destroy_stream(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    let name = StreamName::new(&name).map_err(|e| into_api_error(&e))?;

    info!(stream = %name, "destroying stream via API");

    state
        .controller
        .destroy(&name)
        .await
        .map_err(|e| into_api_error(&e))?;

    Ok(StatusCode::NO_CONTENT)
}

/// Destroy every stream, best effort.
pub async fn destroy_all(State(state): State<AppState>) -> Result<Json<BatchReport>, ApiError> {
    info!("destroying all streams via API");

    let report = state
        .controller
        .destroy_all()
        .await
        .map_err(|e| into_api_error(&e))?;

    Ok(Json(report))
}
