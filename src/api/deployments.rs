//! Deployment lifecycle endpoints.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::FlowError;
use crate::types::{BatchReport, PackageIdentifier, Release, StreamName};

use super::streams::{into_api_error, ErrorResponse};
use super::AppState;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Request to deploy a stream.
#[derive(Debug, Default, Deserialize)]
pub struct DeployRequest {
    /// Deployment properties.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// Request to update a deployed stream.
#[derive(Debug, Deserialize)]
pub struct UpdateStreamRequest {
    /// Release name for the update.
    pub release_name: String,
    /// Package to update to, as `name:version`.
    pub package_identifier: String,
    /// Properties for the new release.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// Response for a release.
#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    /// Owning stream name.
    pub stream: String,
    /// Release version.
    pub version: u64,
    /// Deployed package as `name:version`.
    pub package: String,
    /// Properties in effect at this version.
    pub properties: BTreeMap<String, String>,
    /// Creation timestamp.
    pub created_at: String,
}

fn release_to_response(release: Release) -> ReleaseResponse {
    ReleaseResponse {
        stream: release.stream.to_string(),
        version: release.version,
        package: release.package.to_string(),
        properties: release.properties,
        created_at: release.created_at.to_rfc3339(),
    }
}

fn parse_name(name: &str) -> Result<StreamName, ApiError> {
    StreamName::new(name).map_err(|e| into_api_error(&e))
}

/// Deploy a stream.
pub async fn deploy_stream(
    State(state): State<AppState>,
    Path(name): Path<String>,
    request: Option<Json<DeployRequest>>,
) -> Result<(StatusCode, Json<ReleaseResponse>), ApiError> {
    let name = parse_name(&name)?;
    let properties = request.map(|Json(r)| r.properties).unwrap_or_default();

    info!(stream = %name, "deploying stream via API");

    let release = state
        .controller
        .deploy(&name, properties)
        .await
        .map_err(|e| into_api_error(&e))?;

    Ok((StatusCode::CREATED, Json(release_to_response(release))))
}

/// Undeploy a stream. Idempotent.
pub async fn undeploy_stream(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    let name = parse_name(&name)?;

    info!(stream = %name, "undeploying stream via API");

    state
        .controller
        .undeploy(&name)
        .await
        .map_err(|e| into_api_error(&e))?;

    Ok(StatusCode::NO_CONTENT)
}

/// Undeploy every stream, best effort.
pub async fn undeploy_all(State(state): State<AppState>) -> Result<Json<BatchReport>, ApiError> {
    info!("undeploying all streams via API");

    let report = state
        .controller
        .undeploy_all()
        .await
        .map_err(|e| into_api_error(&e))?;

    Ok(Json(report))
}

/// Update a deployed stream to a new package.
pub async fn update_stream(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<UpdateStreamRequest>,
) -> Result<Json<ReleaseResponse>, ApiError> {
    let name = parse_name(&name)?;
    if request.release_name.trim().is_empty() {
        return Err(into_api_error(&FlowError::invalid_argument(
            "update",
            "release name cannot be empty",
        )));
    }
    if request.package_identifier.trim().is_empty() {
        return Err(into_api_error(&FlowError::invalid_argument(
            "update",
            "package identifier cannot be empty",
        )));
    }

    let package = PackageIdentifier::parse(&request.package_identifier);

    let release = state
        .controller
        .update(&name, &request.release_name, package, request.properties)
        .await
        .map_err(|e| into_api_error(&e))?;

    Ok(Json(release_to_response(release)))
}

/// Roll a stream back to an earlier release.
pub async fn rollback_stream(
    State(state): State<AppState>,
    Path((name, version)): Path<(String, u64)>,
) -> Result<Json<ReleaseResponse>, ApiError> {
    let name = parse_name(&name)?;

    let release = state
        .controller
        .rollback(&name, version)
        .await
        .map_err(|e| into_api_error(&e))?;

    Ok(Json(release_to_response(release)))
}

/// Get the manifest of the latest release.
pub async fn get_manifest_latest(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<String, ApiError> {
    let name = parse_name(&name)?;

    state
        .history
        .manifest(&name, None)
        .await
        .map_err(|e| into_api_error(&e))
}

/// Get the manifest of a specific release.
pub async fn get_manifest(
    State(state): State<AppState>,
    Path((name, version)): Path<(String, u64)>,
) -> Result<String, ApiError> {
    let name = parse_name(&name)?;

    state
        .history
        .manifest(&name, Some(version))
        .await
        .map_err(|e| into_api_error(&e))
}

/// Get the full release history, most recent first.
pub async fn get_history(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<ReleaseResponse>>, ApiError> {
    let name = parse_name(&name)?;

    let releases = state
        .history
        .list(&name, None)
        .await
        .map_err(|e| into_api_error(&e))?;

    Ok(Json(releases.into_iter().map(release_to_response).collect()))
}

/// Get the release history truncated to the given number of revisions.
pub async fn get_history_truncated(
    State(state): State<AppState>,
    Path((name, max_revisions)): Path<(String, usize)>,
) -> Result<Json<Vec<ReleaseResponse>>, ApiError> {
    let name = parse_name(&name)?;

    let releases = state
        .history
        .list(&name, Some(max_revisions))
        .await
        .map_err(|e| into_api_error(&e))?;

    Ok(Json(releases.into_iter().map(release_to_response).collect()))
}

#[cfg(test)]
mod tests {
    use super::super::{router, test_support::make_app_state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn create_stream(app: &axum::Router, name: &str) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/streams")
                    .header("content-type", "application/json")
                    .body(Body::from(format!(
                        r#"{{"name":"{name}","definition":"time | log"}}"#
                    )))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    async fn deploy_stream(app: &axum::Router, name: &str) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/deployments/{name}"))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"properties":{}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn deploy_unknown_stream_not_found() {
        let app = router(make_app_state());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/deployments/ghost")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn deploy_then_manifest_round_trip() {
        let app = router(make_app_state());
        create_stream(&app, "ticker").await;
        deploy_stream(&app, "ticker").await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/deployments/manifest/ticker")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let manifest = String::from_utf8(body.to_vec()).unwrap();
        assert!(manifest.contains("stream: ticker"));
    }

    #[tokio::test]
    async fn double_deploy_conflicts() {
        let app = router(make_app_state());
        create_stream(&app, "ticker").await;
        deploy_stream(&app, "ticker").await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/deployments/ticker")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn rollback_invalid_version_unprocessable() {
        let app = router(make_app_state());
        create_stream(&app, "ticker").await;
        deploy_stream(&app, "ticker").await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/deployments/rollback/ticker/9")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn update_validates_arguments() {
        let app = router(make_app_state());
        create_stream(&app, "ticker").await;
        deploy_stream(&app, "ticker").await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/deployments/update/ticker")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"release_name":"","package_identifier":"app:2.0.0"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn history_truncation() {
        let app = router(make_app_state());
        create_stream(&app, "ticker").await;
        deploy_stream(&app, "ticker").await;

        // Update twice to build history.
        for version in ["2.0.0", "3.0.0"] {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/deployments/update/ticker")
                        .header("content-type", "application/json")
                        .body(Body::from(format!(
                            r#"{{"release_name":"ticker","package_identifier":"app:{version}"}}"#
                        )))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/deployments/history/ticker/1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let releases: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0]["version"], 3);
    }

    #[tokio::test]
    async fn undeploy_all_returns_report() {
        let app = router(make_app_state());
        create_stream(&app, "ticker").await;
        deploy_stream(&app, "ticker").await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/deployments")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let report: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(report["succeeded"][0], "ticker");
    }
}
