//! REST client facade for the control plane.
//!
//! One method per externally observable operation. Every method validates
//! its arguments before any request is issued; a validation failure
//! produces [`FlowError::InvalidArgument`] and performs no state mutation.
//!
//! Endpoint URIs come from a fixed [`Endpoints`] table built and validated
//! once at construction, rather than being resolved per call.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::error::{FlowError, FlowResult};
use crate::types::BatchReport;

/// Fixed table of endpoint templates, validated once at construction.
#[derive(Debug, Clone)]
pub struct Endpoints {
    base: String,
}

impl Endpoints {
    /// Build the endpoint table for a control plane base URL.
    ///
    /// The URL is parsed eagerly so malformed configuration fails here, not
    /// on first use.
    pub fn new(base_url: &str) -> FlowResult<Self> {
        let parsed = reqwest::Url::parse(base_url)
            .map_err(|e| FlowError::Config(format!("invalid base URL '{base_url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FlowError::Config(format!(
                "unsupported URL scheme '{}'",
                parsed.scheme()
            )));
        }

        Ok(Self {
            base: base_url.trim_end_matches('/').to_owned(),
        })
    }

    fn streams(&self) -> String {
        format!("{}/streams", self.base)
    }

    fn streams_paged(&self, size: u32) -> String {
        format!("{}/streams?size={size}", self.base)
    }

    fn stream(&self, name: &str) -> String {
        format!("{}/streams/{name}", self.base)
    }

    fn deployments(&self) -> String {
        format!("{}/deployments", self.base)
    }

    fn deployment(&self, name: &str) -> String {
        format!("{}/deployments/{name}", self.base)
    }

    fn update(&self, name: &str) -> String {
        format!("{}/deployments/update/{name}", self.base)
    }

    fn rollback(&self, name: &str, version: u64) -> String {
        format!("{}/deployments/rollback/{name}/{version}", self.base)
    }

    fn manifest(&self, name: &str, version: Option<u64>) -> String {
        match version {
            Some(version) => format!("{}/deployments/manifest/{name}/{version}", self.base),
            None => format!("{}/deployments/manifest/{name}", self.base),
        }
    }

    fn history(&self, name: &str, max_revisions: Option<usize>) -> String {
        match max_revisions {
            Some(max) => format!("{}/deployments/history/{name}/{max}", self.base),
            None => format!("{}/deployments/history/{name}", self.base),
        }
    }
}

/// A stream definition as returned by the control plane.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamDefinitionResource {
    /// Stream name.
    pub name: String,
    /// DSL pipeline description.
    pub definition: String,
    /// Creation timestamp.
    pub created_at: String,
}

/// A paged stream listing.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamPage {
    /// Definitions in stable insertion order.
    pub items: Vec<StreamDefinitionResource>,
    /// Total number of defined streams.
    pub total: u64,
}

/// A release as returned by the control plane.
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseResource {
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

/// Client for the stream operations of the control plane.
#[derive(Debug, Clone)]
pub struct StreamClient {
    client: Client,
    endpoints: Endpoints,
}

impl StreamClient {
    /// Default page size requested by [`StreamClient::list`].
    pub const DEFAULT_PAGE_SIZE: u32 = 2000;

    /// Create a new client for the given control plane base URL.
    pub fn new(base_url: &str) -> FlowResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(FlowError::Http)?;

        Ok(Self {
            client,
            endpoints: Endpoints::new(base_url)?,
        })
    }

    /// Create a new stream definition, optionally deploying it.
    pub async fn create_stream(
        &self,
        name: &str,
        definition: &str,
        deploy: bool,
    ) -> FlowResult<StreamDefinitionResource> {
        require_text(name, "create", "stream name")?;
        require_text(definition, "create", "stream definition")?;

        let body = serde_json::json!({
            "name": name,
            "definition": definition,
            "deploy": deploy,
        });

        let response = self
            .client
            .post(self.endpoints.streams())
            .json(&body)
            .send()
            .await?;
        json_or_error(response, name, "create").await
    }

    /// List stream definitions.
    pub async fn list(&self) -> FlowResult<StreamPage> {
        let response = self
            .client
            .get(self.endpoints.streams_paged(Self::DEFAULT_PAGE_SIZE))
            .send()
            .await?;
        json_or_error(response, "*", "list").await
    }

    /// Get a stream definition by name.
    pub async fn get_stream_definition(&self, name: &str) -> FlowResult<StreamDefinitionResource> {
        require_text(name, "get", "stream name")?;

        let response = self.client.get(self.endpoints.stream(name)).send().await?;
        json_or_error(response, name, "get").await
    }

    /// Deploy a stream with the given properties.
    pub async fn deploy(
        &self,
        name: &str,
        properties: &BTreeMap<String, String>,
    ) -> FlowResult<ReleaseResource> {
        require_text(name, "deploy", "stream name")?;

        let body = serde_json::json!({ "properties": properties });
        let response = self
            .client
            .post(self.endpoints.deployment(name))
            .json(&body)
            .send()
            .await?;
        json_or_error(response, name, "deploy").await
    }

    /// Undeploy a stream. Idempotent.
    pub async fn undeploy(&self, name: &str) -> FlowResult<()> {
        require_text(name, "undeploy", "stream name")?;

        let response = self
            .client
            .delete(self.endpoints.deployment(name))
            .send()
            .await?;
        unit_or_error(response, name, "undeploy").await
    }

    /// Undeploy every stream, best effort.
    pub async fn undeploy_all(&self) -> FlowResult<BatchReport> {
        let response = self
            .client
            .delete(self.endpoints.deployments())
            .send()
            .await?;
        json_or_error(response, "*", "undeploy_all").await
    }

    /// Destroy a stream.
    pub async fn destroy(&self, name: &str) -> FlowResult<()> {
        require_text(name, "destroy", "stream name")?;

        let response = self
            .client
            .delete(self.endpoints.stream(name))
            .send()
            .await?;
        unit_or_error(response, name, "destroy").await
    }

    /// Destroy every stream, best effort.
    pub async fn destroy_all(&self) -> FlowResult<BatchReport> {
        let response = self.client.delete(self.endpoints.streams()).send().await?;
        json_or_error(response, "*", "destroy_all").await
    }

    /// Update a deployed stream to a new package.
    pub async fn update_stream(
        &self,
        name: &str,
        release_name: &str,
        package_identifier: &str,
        properties: &BTreeMap<String, String>,
    ) -> FlowResult<ReleaseResource> {
        require_text(name, "update", "stream name")?;
        require_text(release_name, "update", "release name")?;
        require_text(package_identifier, "update", "package identifier")?;

        let body = serde_json::json!({
            "release_name": release_name,
            "package_identifier": package_identifier,
            "properties": properties,
        });

        let response = self
            .client
            .post(self.endpoints.update(name))
            .json(&body)
            .send()
            .await?;
        json_or_error(response, name, "update").await
    }

    /// Roll a stream back to an earlier release.
    pub async fn rollback_stream(&self, name: &str, version: u64) -> FlowResult<ReleaseResource> {
        require_text(name, "rollback", "stream name")?;

        let response = self
            .client
            .post(self.endpoints.rollback(name, version))
            .send()
            .await?;
        json_or_error(response, name, "rollback").await
    }

    /// Get the manifest for a release. `None` selects the latest.
    pub async fn get_manifest(&self, name: &str, version: Option<u64>) -> FlowResult<String> {
        require_text(name, "manifest", "stream name")?;

        let response = self
            .client
            .get(self.endpoints.manifest(name, version))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response.status(), name, "manifest"));
        }
        Ok(response.text().await?)
    }

    /// Get the release history for a stream, most recent first.
    pub async fn history(
        &self,
        name: &str,
        max_revisions: Option<usize>,
    ) -> FlowResult<Vec<ReleaseResource>> {
        require_text(name, "history", "stream name")?;

        let response = self
            .client
            .get(self.endpoints.history(name, max_revisions))
            .send()
            .await?;
        json_or_error(response, name, "history").await
    }
}

fn require_text(value: &str, operation: &'static str, what: &str) -> FlowResult<()> {
    if value.trim().is_empty() {
        return Err(FlowError::invalid_argument(
            operation,
            format!("{what} cannot be empty"),
        ));
    }
    Ok(())
}

fn status_error(status: StatusCode, stream: &str, operation: &'static str) -> FlowError {
    match status {
        StatusCode::NOT_FOUND => FlowError::StreamNotFound {
            stream: stream.to_owned(),
            operation,
        },
        StatusCode::CONFLICT => FlowError::conflict(stream, operation, "rejected by control plane"),
        _ => FlowError::backend(format!("{operation} on {stream} failed: {status}")),
    }
}

async fn json_or_error<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    stream: &str,
    operation: &'static str,
) -> FlowResult<T> {
    if !response.status().is_success() {
        return Err(status_error(response.status(), stream, operation));
    }
    response.json().await.map_err(FlowError::Http)
}

async fn unit_or_error(
    response: reqwest::Response,
    stream: &str,
    operation: &'static str,
) -> FlowResult<()> {
    if !response.status().is_success() {
        return Err(status_error(response.status(), stream, operation));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_reject_bad_urls() {
        assert!(Endpoints::new("not a url").is_err());
        assert!(Endpoints::new("ftp://example.com").is_err());
        assert!(Endpoints::new("http://localhost:9393").is_ok());
    }

    #[test]
    fn endpoints_expand_templates() {
        let endpoints = Endpoints::new("http://localhost:9393/").unwrap();
        assert_eq!(endpoints.streams(), "http://localhost:9393/streams");
        assert_eq!(
            endpoints.stream("ticker"),
            "http://localhost:9393/streams/ticker"
        );
        assert_eq!(
            endpoints.rollback("ticker", 2),
            "http://localhost:9393/deployments/rollback/ticker/2"
        );
        assert_eq!(
            endpoints.manifest("ticker", None),
            "http://localhost:9393/deployments/manifest/ticker"
        );
        assert_eq!(
            endpoints.manifest("ticker", Some(3)),
            "http://localhost:9393/deployments/manifest/ticker/3"
        );
        assert_eq!(
            endpoints.history("ticker", Some(5)),
            "http://localhost:9393/deployments/history/ticker/5"
        );
    }

    #[tokio::test]
    async fn validation_failures_do_not_issue_requests() {
        // The base URL points nowhere; if validation did not short-circuit,
        // these calls would error with a connection failure instead of
        // InvalidArgument.
        let client = StreamClient::new("http://127.0.0.1:1").unwrap();

        let result = client.create_stream("", "time | log", false).await;
        assert!(matches!(result, Err(FlowError::InvalidArgument { .. })));

        let result = client.create_stream("ticker", "", false).await;
        assert!(matches!(result, Err(FlowError::InvalidArgument { .. })));

        let result = client.deploy("", &BTreeMap::new()).await;
        assert!(matches!(result, Err(FlowError::InvalidArgument { .. })));

        let result = client
            .update_stream("ticker", "", "app:2.0.0", &BTreeMap::new())
            .await;
        assert!(matches!(result, Err(FlowError::InvalidArgument { .. })));

        let result = client
            .update_stream("ticker", "ticker", " ", &BTreeMap::new())
            .await;
        assert!(matches!(result, Err(FlowError::InvalidArgument { .. })));

        let result = client.rollback_stream("", 1).await;
        assert!(matches!(result, Err(FlowError::InvalidArgument { .. })));

        let result = client.get_manifest(" ", None).await;
        assert!(matches!(result, Err(FlowError::InvalidArgument { .. })));

        let result = client.history("", None).await;
        assert!(matches!(result, Err(FlowError::InvalidArgument { .. })));
    }
}
