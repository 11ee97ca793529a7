//! Lifecycle state machine enforcement.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::backend::{BackendRequest, DeployBackend};
use crate::config::DeploymentConfig;
use crate::error::{FlowError, FlowResult};
use crate::history::ReleaseHistory;
use crate::manifest;
use crate::registry::StreamRegistry;
use crate::state::AnyDeployment;
use crate::store::FlowStore;
use crate::types::{
    BatchFailure, BatchReport, DeploymentRecord, PackageIdentifier, Release, ReleaseDraft,
    StreamDefinition, StreamName,
};

use super::locks::StreamLocks;

/// Enforces the stream lifecycle state machine.
///
/// All lifecycle commands for a given stream are serialised through a
/// per-stream lock; commands on distinct streams run concurrently. Once a
/// command has passed validation the backend call and the terminal state
/// transition run on a detached task: callers that stop waiting do not
/// cancel the transition, they merely stop observing it.
pub struct DeploymentController {
    store: Arc<dyn FlowStore>,
    registry: Arc<StreamRegistry>,
    history: Arc<ReleaseHistory>,
    backend: Arc<dyn DeployBackend>,
    locks: StreamLocks,
    config: DeploymentConfig,
}

impl DeploymentController {
    /// Create a new controller.
    #[must_use]
    pub fn new(
        store: Arc<dyn FlowStore>,
        registry: Arc<StreamRegistry>,
        history: Arc<ReleaseHistory>,
        backend: Arc<dyn DeployBackend>,
        config: DeploymentConfig,
    ) -> Self {
        Self {
            store,
            registry,
            history,
            backend,
            locks: StreamLocks::default(),
            config,
        }
    }

    /// Define a new stream, optionally deploying it immediately.
    pub async fn create_stream(
        &self,
        name: StreamName,
        definition: impl Into<String>,
        deploy: bool,
    ) -> FlowResult<StreamDefinition> {
        let stream_definition = self.registry.define(name.clone(), definition).await?;

        if deploy {
            self.deploy(&name, BTreeMap::new()).await?;
        }

        Ok(stream_definition)
    }

    /// Deploy a stream.
    ///
    /// Permitted from the undeployed and failed states. On backend success
    /// a new release is appended and the stream becomes deployed; on
    /// failure the stream becomes failed.
    pub async fn deploy(
        &self,
        name: &StreamName,
        properties: BTreeMap<String, String>,
    ) -> FlowResult<Release> {
        let guard = self.locks.acquire(name).await?;
        let definition = self.lookup_for(name, "deploy").await?;

        let deploying = match self.load(name).await? {
            AnyDeployment::Undeployed(d) => d.begin_deploy(properties.clone()),
            AnyDeployment::Failed(d) => d.begin_deploy(properties.clone()),
            other => {
                return Err(FlowError::conflict(
                    name.as_str(),
                    "deploy",
                    format!("stream is {}", other.status()),
                ))
            }
        };

        let mut record = deploying.into_record();
        record.meta.object_version = self.store.put_deployment(&record).await?;

        let package = PackageIdentifier {
            name: name.as_str().to_owned(),
            version: "1.0.0".to_owned(),
        };
        let rendered = manifest::render(name, &definition.definition, &package, &properties);

        let store = Arc::clone(&self.store);
        let history = Arc::clone(&self.history);
        let backend = Arc::clone(&self.backend);
        let config = self.config.clone();
        let name = name.clone();

        detach(async move {
            let _guard = guard;
            let request = BackendRequest {
                stream: name.clone(),
                package: package.clone(),
                manifest: rendered.clone(),
                properties: properties.clone(),
            };

            info!(stream = %name, "deploying stream");

            match backend_call(&*backend, &config, &request).await {
                Ok(()) => {
                    let release = history
                        .append(ReleaseDraft {
                            stream: name.clone(),
                            package,
                            manifest: rendered,
                            properties,
                        })
                        .await?;

                    commit(&*store, record, |any| match any {
                        AnyDeployment::Deploying(d) => {
                            Ok(d.complete(release.version).into_record())
                        }
                        other => Err(unexpected_state(&name, "deploy", other.status().as_str())),
                    })
                    .await?;

                    info!(stream = %name, version = release.version, "stream deployed");
                    Ok(release)
                }
                Err(e) => {
                    error!(stream = %name, error = %e, "deploy failed");
                    let message = e.to_string();

                    commit(&*store, record, |any| match any {
                        AnyDeployment::Deploying(d) => Ok(d.fail(message.clone()).into_record()),
                        other => Err(unexpected_state(&name, "deploy", other.status().as_str())),
                    })
                    .await?;

                    Err(FlowError::DeployFailed {
                        stream: name.to_string(),
                        message,
                    })
                }
            }
        })
        .await
    }

    /// Undeploy a stream.
    ///
    /// Idempotent: undeploying an undeployed stream is a no-op success.
    /// Release history is retained.
    pub async fn undeploy(&self, name: &StreamName) -> FlowResult<()> {
        let guard = self.locks.acquire(name).await?;
        self.lookup_for(name, "undeploy").await?;

        let undeployed = match self.load(name).await? {
            AnyDeployment::Undeployed(_) => return Ok(()),
            AnyDeployment::Deployed(d) => d.undeploy(),
            AnyDeployment::Failed(d) => d.undeploy(),
            other => {
                return Err(FlowError::conflict(
                    name.as_str(),
                    "undeploy",
                    format!("stream is {}", other.status()),
                ))
            }
        };

        let store = Arc::clone(&self.store);
        let backend = Arc::clone(&self.backend);
        let name = name.clone();

        detach(async move {
            let _guard = guard;
            backend.undeploy(&name).await?;
            store.put_deployment(undeployed.record()).await?;
            info!(stream = %name, "stream undeployed");
            Ok(())
        })
        .await
    }

    /// Update a deployed stream to a new package.
    ///
    /// Transactional: either a new release is committed and the stream is
    /// deployed on it, or nothing changes and the prior release stays live.
    pub async fn update(
        &self,
        name: &StreamName,
        release_name: &str,
        package: PackageIdentifier,
        properties: BTreeMap<String, String>,
    ) -> FlowResult<Release> {
        let guard = self.locks.acquire(name).await?;
        let definition = self.lookup_for(name, "update").await?;

        let updating = self
            .load(name)
            .await?
            .try_into_deployed("update")?
            .begin_update();

        let mut record = updating.into_record();
        record.meta.object_version = self.store.put_deployment(&record).await?;

        let rendered = manifest::render(name, &definition.definition, &package, &properties);

        info!(stream = %name, release = release_name, package = %package, "updating stream");

        let store = Arc::clone(&self.store);
        let history = Arc::clone(&self.history);
        let backend = Arc::clone(&self.backend);
        let config = self.config.clone();
        let name = name.clone();

        detach(async move {
            let _guard = guard;
            let request = BackendRequest {
                stream: name.clone(),
                package: package.clone(),
                manifest: rendered.clone(),
                properties: properties.clone(),
            };

            match backend_call(&*backend, &config, &request).await {
                Ok(()) => {
                    let release = history
                        .append(ReleaseDraft {
                            stream: name.clone(),
                            package,
                            manifest: rendered,
                            properties: properties.clone(),
                        })
                        .await?;

                    commit(&*store, record, |any| match any {
                        AnyDeployment::Updating(d) => {
                            Ok(d.complete(release.version, properties).into_record())
                        }
                        other => Err(unexpected_state(&name, "update", other.status().as_str())),
                    })
                    .await?;

                    info!(stream = %name, version = release.version, "stream updated");
                    Ok(release)
                }
                Err(e) => {
                    warn!(stream = %name, error = %e, "update failed, prior release retained");
                    let message = e.to_string();

                    commit(&*store, record, |any| match any {
                        AnyDeployment::Updating(d) => Ok(d.abort(message.clone()).into_record()),
                        other => Err(unexpected_state(&name, "update", other.status().as_str())),
                    })
                    .await?;

                    Err(FlowError::UpdateFailed {
                        stream: name.to_string(),
                        message,
                    })
                }
            }
        })
        .await
    }

    /// Roll a stream back to an earlier release.
    ///
    /// History is never rewritten: the rollback appends a new release whose
    /// package, manifest and properties copy the target version.
    pub async fn rollback(&self, name: &StreamName, target_version: u64) -> FlowResult<Release> {
        let guard = self.locks.acquire(name).await?;
        self.lookup_for(name, "rollback").await?;

        let target = if target_version == 0 {
            None
        } else {
            self.store.get_release(name, target_version).await?
        };
        let Some(target) = target else {
            return Err(FlowError::InvalidVersion {
                stream: name.to_string(),
                version: target_version,
            });
        };

        let deploying = match self.load(name).await? {
            AnyDeployment::Deployed(d) => d.begin_rollback(target.properties.clone()),
            AnyDeployment::Failed(d) => d.begin_rollback(target.properties.clone()),
            other => {
                return Err(FlowError::conflict(
                    name.as_str(),
                    "rollback",
                    format!("stream is {}", other.status()),
                ))
            }
        };

        let mut record = deploying.into_record();
        record.meta.object_version = self.store.put_deployment(&record).await?;

        info!(stream = %name, target_version, "rolling back stream");

        let store = Arc::clone(&self.store);
        let history = Arc::clone(&self.history);
        let backend = Arc::clone(&self.backend);
        let config = self.config.clone();
        let name = name.clone();

        detach(async move {
            let _guard = guard;
            let request = BackendRequest {
                stream: name.clone(),
                package: target.package.clone(),
                manifest: target.manifest.clone(),
                properties: target.properties.clone(),
            };

            match backend_call(&*backend, &config, &request).await {
                Ok(()) => {
                    let release = history
                        .append(ReleaseDraft {
                            stream: name.clone(),
                            package: target.package,
                            manifest: target.manifest,
                            properties: target.properties,
                        })
                        .await?;

                    commit(&*store, record, |any| match any {
                        AnyDeployment::Deploying(d) => {
                            Ok(d.complete(release.version).into_record())
                        }
                        other => Err(unexpected_state(&name, "rollback", other.status().as_str())),
                    })
                    .await?;

                    info!(stream = %name, version = release.version, "stream rolled back");
                    Ok(release)
                }
                Err(e) => {
                    error!(stream = %name, error = %e, "rollback failed");
                    let message = e.to_string();

                    commit(&*store, record, |any| match any {
                        AnyDeployment::Deploying(d) => Ok(d.fail(message.clone()).into_record()),
                        other => Err(unexpected_state(&name, "rollback", other.status().as_str())),
                    })
                    .await?;

                    Err(FlowError::DeployFailed {
                        stream: name.to_string(),
                        message,
                    })
                }
            }
        })
        .await
    }

    /// Destroy a stream: its definition, deployment record and history.
    ///
    /// Fails with `Conflict` unless the deployment is undeployed.
    pub async fn destroy(&self, name: &StreamName) -> FlowResult<()> {
        let _guard = self.locks.acquire(name).await?;
        self.registry.remove(name).await
    }

    /// Undeploy every known stream, best effort.
    ///
    /// A failure on one stream is recorded and does not abort the rest.
    pub async fn undeploy_all(&self) -> FlowResult<BatchReport> {
        let names = self.registry.names().await?;
        let mut report = BatchReport::default();

        for name in names {
            match self.undeploy(&name).await {
                Ok(()) => report.succeeded.push(name.to_string()),
                Err(e) => {
                    warn!(stream = %name, error = %e, "undeploy failed in batch");
                    report.failed.push(BatchFailure {
                        stream: name.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Destroy every known stream, best effort.
    ///
    /// Streams that are still deployed fail their item with `Conflict` and
    /// are left intact.
    pub async fn destroy_all(&self) -> FlowResult<BatchReport> {
        let names = self.registry.names().await?;
        let mut report = BatchReport::default();

        for name in names {
            match self.destroy(&name).await {
                Ok(()) => report.succeeded.push(name.to_string()),
                Err(e) => {
                    warn!(stream = %name, error = %e, "destroy failed in batch");
                    report.failed.push(BatchFailure {
                        stream: name.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Current deployment record for a stream, if it was ever deployed.
    pub async fn deployment(&self, name: &StreamName) -> FlowResult<Option<DeploymentRecord>> {
        self.store.get_deployment(name).await
    }

    async fn lookup_for(
        &self,
        name: &StreamName,
        operation: &'static str,
    ) -> FlowResult<StreamDefinition> {
        match self.registry.lookup(name).await {
            Ok(definition) => Ok(definition),
            Err(FlowError::StreamNotFound { stream, .. }) => {
                Err(FlowError::StreamNotFound { stream, operation })
            }
            Err(e) => Err(e),
        }
    }

    async fn load(&self, name: &StreamName) -> FlowResult<AnyDeployment> {
        let record = self
            .store
            .get_deployment(name)
            .await?
            .unwrap_or_else(|| DeploymentRecord::new(name.clone()));
        Ok(AnyDeployment::from_record(record))
    }
}

/// Run a lifecycle phase on a detached task.
///
/// The transition survives the caller dropping its future: the spawned
/// task runs to its terminal state regardless, the caller only stops
/// observing the outcome.
async fn detach<T: Send + 'static>(
    fut: impl std::future::Future<Output = FlowResult<T>> + Send + 'static,
) -> FlowResult<T> {
    match tokio::spawn(fut).await {
        Ok(result) => result,
        Err(e) => Err(FlowError::internal(format!("lifecycle task failed: {e}"))),
    }
}

/// Apply a transition to the given persisted record and write it back.
async fn commit(
    store: &dyn FlowStore,
    record: DeploymentRecord,
    transition: impl FnOnce(AnyDeployment) -> FlowResult<DeploymentRecord>,
) -> FlowResult<()> {
    let next = transition(AnyDeployment::from_record(record))?;
    store.put_deployment(&next).await?;
    Ok(())
}

/// Call the backend, retrying transient failures a bounded number of times.
async fn backend_call(
    backend: &dyn DeployBackend,
    config: &DeploymentConfig,
    request: &BackendRequest,
) -> FlowResult<()> {
    let mut attempt = 0;
    loop {
        match backend.deploy(request).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempt < config.retry_attempts => {
                attempt += 1;
                warn!(
                    stream = %request.stream,
                    attempt,
                    error = %e,
                    "transient backend failure, retrying"
                );
                tokio::time::sleep(Duration::from_millis(config.retry_backoff_ms)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn unexpected_state(name: &StreamName, operation: &'static str, status: &str) -> FlowError {
    FlowError::internal(format!(
        "{operation} on {name}: deployment record changed underneath the lock (now {status})"
    ))
}

impl std::fmt::Debug for DeploymentController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentController").finish_non_exhaustive()
    }
}
