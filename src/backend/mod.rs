//! External deploy backend.
//!
//! The control plane delegates the actual rollout of a release to a deploy
//! backend. The primary implementation talks to a remote deployer service
//! over HTTP; an in-memory mock is provided for testing.

mod remote;

pub use remote::RemoteBackend;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{BackendConfig, BackendKind};
use crate::error::{FlowError, FlowResult};
use crate::types::{PackageIdentifier, StreamName};

/// Request to deploy a release of a stream.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    /// Stream being deployed.
    pub stream: StreamName,
    /// Package to roll out.
    pub package: PackageIdentifier,
    /// Rendered manifest for this release.
    pub manifest: String,
    /// Deployment properties.
    pub properties: BTreeMap<String, String>,
}

/// Trait for deploy backend implementations.
///
/// A call returns only once the backend has confirmed the outcome; the
/// operation is not cancellable once initiated.
#[async_trait]
pub trait DeployBackend: Send + Sync {
    /// Roll out a release. Used for deploy, update and rollback alike.
    async fn deploy(&self, request: &BackendRequest) -> FlowResult<()>;

    /// Tear down the live instantiation of a stream.
    async fn undeploy(&self, stream: &StreamName) -> FlowResult<()>;
}

/// Create a backend from configuration.
pub fn create_backend(config: &BackendConfig) -> FlowResult<Arc<dyn DeployBackend>> {
    match config.kind {
        BackendKind::Remote => Ok(Arc::new(RemoteBackend::new(config)?)),
        BackendKind::Mock => Ok(Arc::new(MockBackend::default())),
    }
}

/// Mock backend for testing.
///
/// Tracks which streams are live and supports failure injection, both
/// persistent (per stream) and transient (fail the next N calls).
#[derive(Debug, Default)]
pub struct MockBackend {
    live: std::sync::RwLock<std::collections::HashSet<String>>,
    failing: std::sync::RwLock<std::collections::HashSet<String>>,
    transient_failures: std::sync::atomic::AtomicU32,
}

impl MockBackend {
    /// Mark every future call for this stream as failing.
    pub fn fail_stream(&self, stream: &str) {
        if let Ok(mut failing) = self.failing.write() {
            failing.insert(stream.to_owned());
        }
    }

    /// Stop failing calls for this stream.
    pub fn recover_stream(&self, stream: &str) {
        if let Ok(mut failing) = self.failing.write() {
            failing.remove(stream);
        }
    }

    /// Fail the next `count` calls (any stream), then recover.
    pub fn fail_next(&self, count: u32) {
        self.transient_failures
            .store(count, std::sync::atomic::Ordering::SeqCst);
    }

    /// Whether the stream is currently live on the backend.
    #[must_use]
    pub fn is_live(&self, stream: &str) -> bool {
        self.live.read().is_ok_and(|live| live.contains(stream))
    }

    fn check_failures(&self, stream: &StreamName) -> FlowResult<()> {
        let remaining = self
            .transient_failures
            .fetch_update(
                std::sync::atomic::Ordering::SeqCst,
                std::sync::atomic::Ordering::SeqCst,
                |n| n.checked_sub(1),
            )
            .is_ok();
        if remaining {
            return Err(FlowError::backend("injected transient failure"));
        }

        let failing = self
            .failing
            .read()
            .map_err(|_| FlowError::internal("lock poisoned"))?;
        if failing.contains(stream.as_str()) {
            return Err(FlowError::backend(format!(
                "injected failure for {stream}"
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl DeployBackend for MockBackend {
    async fn deploy(&self, request: &BackendRequest) -> FlowResult<()> {
        self.check_failures(&request.stream)?;

        let mut live = self
            .live
            .write()
            .map_err(|_| FlowError::internal("lock poisoned"))?;
        live.insert(request.stream.as_str().to_owned());

        Ok(())
    }

    async fn undeploy(&self, stream: &StreamName) -> FlowResult<()> {
        self.check_failures(stream)?;

        let mut live = self
            .live
            .write()
            .map_err(|_| FlowError::internal("lock poisoned"))?;
        live.remove(stream.as_str());

        Ok(())
    }
}
