//! Stream definition registry.
//!
//! Maps stream names to their definitions and answers paged listings in
//! stable insertion order. Removal is guarded by the deployment state:
//! a stream whose deployment is not undeployed cannot be removed.

use std::sync::Arc;

use tracing::info;

use crate::error::{FlowError, FlowResult};
use crate::store::{DefinitionPage, FlowStore};
use crate::types::{DeploymentStatus, StreamDefinition, StreamName};

/// Registry of stream definitions.
pub struct StreamRegistry {
    store: Arc<dyn FlowStore>,
    max_page_size: u32,
}

impl StreamRegistry {
    /// Create a new registry over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn FlowStore>, max_page_size: u32) -> Self {
        Self {
            store,
            max_page_size,
        }
    }

    /// Define a new stream.
    ///
    /// Fails with `DuplicateStream` if the name is taken.
    pub async fn define(
        &self,
        name: StreamName,
        definition: impl Into<String>,
    ) -> FlowResult<StreamDefinition> {
        let stream_definition = StreamDefinition::new(name, definition);
        self.store.insert_definition(&stream_definition).await?;

        info!(stream = %stream_definition.name, "stream defined");
        Ok(stream_definition)
    }

    /// Look up a stream definition by name.
    ///
    /// Fails with `StreamNotFound` if absent.
    pub async fn lookup(&self, name: &StreamName) -> FlowResult<StreamDefinition> {
        self.store
            .get_definition(name)
            .await?
            .ok_or_else(|| FlowError::not_found(name.as_str(), "lookup"))
    }

    /// Remove a stream and everything belonging to it.
    ///
    /// Fails with `StreamNotFound` if absent, or `Conflict` if the stream's
    /// deployment is not undeployed.
    pub async fn remove(&self, name: &StreamName) -> FlowResult<()> {
        if self.store.get_definition(name).await?.is_none() {
            return Err(FlowError::not_found(name.as_str(), "destroy"));
        }

        if let Some(deployment) = self.store.get_deployment(name).await? {
            if deployment.status != DeploymentStatus::Undeployed {
                return Err(FlowError::conflict(
                    name.as_str(),
                    "destroy",
                    format!("stream is {}", deployment.status),
                ));
            }
        }

        self.store.delete_stream(name).await?;
        info!(stream = %name, "stream destroyed");
        Ok(())
    }

    /// List stream definitions in stable insertion order.
    ///
    /// The page size is clamped to the configured maximum.
    pub async fn list(&self, page_size: Option<u32>) -> FlowResult<DefinitionPage> {
        let size = page_size
            .unwrap_or(self.max_page_size)
            .min(self.max_page_size);
        self.store.list_definitions(Some(size)).await
    }

    /// Names of every known stream, in insertion order.
    pub async fn names(&self) -> FlowResult<Vec<StreamName>> {
        let page = self.store.list_definitions(None).await?;
        Ok(page.items.into_iter().map(|d| d.name).collect())
    }
}

impl std::fmt::Debug for StreamRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRegistry").finish_non_exhaustive()
    }
}
