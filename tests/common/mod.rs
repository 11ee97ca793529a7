//! Common test utilities for control plane integration tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use flowplane::{
    api::AppState,
    backend::{DeployBackend, MockBackend},
    config::DeploymentConfig,
    store::FlowStore,
    DeploymentController, MemoryStore, ReleaseHistory, StreamName, StreamRegistry,
};

/// Complete test control plane with all components wired together.
pub struct TestPlane {
    pub controller: Arc<DeploymentController>,
    pub registry: Arc<StreamRegistry>,
    pub history: Arc<ReleaseHistory>,
    pub backend: Arc<MockBackend>,
    pub app_state: AppState,
}

impl TestPlane {
    /// Creates a new test control plane with default configuration.
    pub fn new() -> Self {
        Self::with_config(DeploymentConfig {
            retry_backoff_ms: 1,
            ..DeploymentConfig::default()
        })
    }

    /// Creates a new test control plane with custom deployment configuration.
    pub fn with_config(config: DeploymentConfig) -> Self {
        let store: Arc<dyn FlowStore> = Arc::new(MemoryStore::new());
        let registry = Arc::new(StreamRegistry::new(Arc::clone(&store), config.max_page_size));
        let history = Arc::new(ReleaseHistory::new(Arc::clone(&store)));
        let backend = Arc::new(MockBackend::default());

        let controller = Arc::new(DeploymentController::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&history),
            Arc::clone(&backend) as Arc<dyn DeployBackend>,
            config,
        ));

        let app_state = AppState {
            controller: Arc::clone(&controller),
            registry: Arc::clone(&registry),
            history: Arc::clone(&history),
            store,
        };

        Self {
            controller,
            registry,
            history,
            backend,
            app_state,
        }
    }

    /// Define a stream without deploying it.
    pub async fn define(&self, name: &str) {
        self.controller
            .create_stream(stream_name(name), "time | log", false)
            .await
            .expect("create_stream failed");
    }

    /// Define and deploy a stream with no properties.
    pub async fn define_and_deploy(&self, name: &str) {
        self.controller
            .create_stream(stream_name(name), "time | log", true)
            .await
            .expect("create_stream with deploy failed");
    }
}

/// Parse a stream name, panicking on invalid input.
pub fn stream_name(name: &str) -> StreamName {
    StreamName::new(name).expect("invalid stream name in test")
}

/// Build a property map from string pairs.
pub fn props(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}
