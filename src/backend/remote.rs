//! HTTP client for a remote deployer service.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Serialize;

use crate::config::BackendConfig;
use crate::error::{FlowError, FlowResult};
use crate::types::StreamName;

use super::{BackendRequest, DeployBackend};

/// Wire format for a deploy request to the remote deployer.
#[derive(Debug, Serialize)]
struct DeployBody<'a> {
    package: String,
    manifest: &'a str,
    properties: &'a std::collections::BTreeMap<String, String>,
}

/// Deploy backend that drives a remote deployer service over HTTP.
#[derive(Debug, Clone)]
pub struct RemoteBackend {
    client: Client,
    base_url: String,
}

impl RemoteBackend {
    /// Create a new remote backend from configuration.
    pub fn new(config: &BackendConfig) -> FlowResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(FlowError::Http)?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_owned(),
        })
    }

    /// Create a new remote backend with a custom base URL.
    pub fn with_url(url: impl Into<String>) -> FlowResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(FlowError::Http)?;

        Ok(Self {
            client,
            base_url: url.into().trim_end_matches('/').to_owned(),
        })
    }
}

#[async_trait::async_trait]
impl DeployBackend for RemoteBackend {
    async fn deploy(&self, request: &BackendRequest) -> FlowResult<()> {
        let url = format!("{}/deployments/{}", self.base_url, request.stream);
        let body = DeployBody {
            package: request.package.to_string(),
            manifest: &request.manifest,
            properties: &request.properties,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(FlowError::Http)?;

        if !response.status().is_success() {
            return Err(FlowError::backend(format!(
                "deployer rejected {}: {}",
                request.stream,
                response.status()
            )));
        }

        Ok(())
    }

    async fn undeploy(&self, stream: &StreamName) -> FlowResult<()> {
        let url = format!("{}/deployments/{}", self.base_url, stream);

        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(FlowError::Http)?;

        // An already-absent deployment counts as success; undeploy is
        // idempotent end to end.
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(FlowError::backend(format!(
                "deployer failed to undeploy {}: {}",
                stream,
                response.status()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_trailing_slash() {
        let backend = RemoteBackend::with_url("http://localhost:9000/").unwrap();
        assert_eq!(backend.base_url, "http://localhost:9000");
    }
}
