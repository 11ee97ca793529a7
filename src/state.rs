//! Typestate pattern for the stream deployment state machine.
//!
//! This module encodes deployment lifecycle states in the type system,
//! making invalid state transitions a compile-time error rather than a
//! runtime error.
//!
//! # Example
//!
//! ```ignore
//! let undeployed = Deployment::<Undeployed>::create(record);
//! let deploying = undeployed.begin_deploy(properties);
//! let deployed = deploying.complete(1);
//! // deployed.complete(2) would not compile - invalid transition
//! ```

use std::collections::BTreeMap;
use std::marker::PhantomData;

use crate::error::{FlowError, FlowResult};
use crate::types::{DeploymentRecord, DeploymentStatus, StreamName};

// =============================================================================
// State marker types (zero-sized)
// =============================================================================

/// Marker trait for deployment lifecycle states.
pub trait LifecycleState: private::Sealed + Send + Sync {
    /// Get the persisted status representation.
    fn status() -> DeploymentStatus;

    /// Get the state name for error messages.
    fn name() -> &'static str;
}

mod private {
    pub trait Sealed {}
}

/// No live instantiation of the stream exists.
#[derive(Debug, Clone, Copy)]
pub struct Undeployed;

/// A deploy or rollback is in flight with the backend.
#[derive(Debug, Clone, Copy)]
pub struct Deploying;

/// The current release is live.
#[derive(Debug, Clone, Copy)]
pub struct Deployed;

/// An update is in flight with the backend.
#[derive(Debug, Clone, Copy)]
pub struct Updating;

/// The backend reported failure for the last lifecycle operation.
#[derive(Debug, Clone, Copy)]
pub struct Failed;

impl private::Sealed for Undeployed {}
impl private::Sealed for Deploying {}
impl private::Sealed for Deployed {}
impl private::Sealed for Updating {}
impl private::Sealed for Failed {}

impl LifecycleState for Undeployed {
    fn status() -> DeploymentStatus {
        DeploymentStatus::Undeployed
    }
    fn name() -> &'static str {
        "undeployed"
    }
}

impl LifecycleState for Deploying {
    fn status() -> DeploymentStatus {
        DeploymentStatus::Deploying
    }
    fn name() -> &'static str {
        "deploying"
    }
}

impl LifecycleState for Deployed {
    fn status() -> DeploymentStatus {
        DeploymentStatus::Deployed
    }
    fn name() -> &'static str {
        "deployed"
    }
}

impl LifecycleState for Updating {
    fn status() -> DeploymentStatus {
        DeploymentStatus::Updating
    }
    fn name() -> &'static str {
        "updating"
    }
}

impl LifecycleState for Failed {
    fn status() -> DeploymentStatus {
        DeploymentStatus::Failed
    }
    fn name() -> &'static str {
        "failed"
    }
}

// =============================================================================
// Deployment struct parameterised by state
// =============================================================================

/// A stream deployment in a specific lifecycle state.
///
/// The state parameter `S` determines which transitions are available.
/// Invalid transitions are caught at compile time.
#[derive(Debug)]
pub struct Deployment<S: LifecycleState> {
    /// The underlying persisted record.
    record: DeploymentRecord,
    /// Zero-sized state marker.
    _state: PhantomData<S>,
}

impl<S: LifecycleState> Deployment<S> {
    /// Get a reference to the underlying record.
    #[must_use]
    pub const fn record(&self) -> &DeploymentRecord {
        &self.record
    }

    /// Get the owning stream name.
    #[must_use]
    pub const fn stream(&self) -> &StreamName {
        &self.record.stream
    }

    /// Get the current state as a persisted status.
    #[must_use]
    pub fn status(&self) -> DeploymentStatus {
        S::status()
    }

    /// Convert into the underlying record (consuming the deployment).
    #[must_use]
    pub fn into_record(self) -> DeploymentRecord {
        self.record
    }

    /// Internal helper to transition to a new state.
    fn transition<T: LifecycleState>(
        mut self,
        f: impl FnOnce(&mut DeploymentRecord),
    ) -> Deployment<T> {
        f(&mut self.record);
        self.record.status = T::status();
        self.record.updated_at = chrono::Utc::now();
        Deployment {
            record: self.record,
            _state: PhantomData,
        }
    }
}

// =============================================================================
// State transitions
// =============================================================================

impl Deployment<Undeployed> {
    /// Create a deployment in the undeployed state.
    ///
    /// The record's status must match; this is the entry point for streams
    /// with no prior deployment.
    #[must_use]
    pub fn create(mut record: DeploymentRecord) -> Self {
        record.status = DeploymentStatus::Undeployed;
        Self {
            record,
            _state: PhantomData,
        }
    }

    /// Start a deploy with the given properties.
    #[must_use]
    pub fn begin_deploy(self, properties: BTreeMap<String, String>) -> Deployment<Deploying> {
        self.transition(|record| {
            record.properties = properties;
            record.error = None;
        })
    }
}

impl Deployment<Deploying> {
    /// Record backend confirmation: the given release version is now live.
    #[must_use]
    pub fn complete(self, version: u64) -> Deployment<Deployed> {
        self.transition(|record| {
            record.current_version = Some(version);
            record.error = None;
        })
    }

    /// Record backend failure.
    #[must_use]
    pub fn fail(self, error: String) -> Deployment<Failed> {
        self.transition(|record| {
            record.error = Some(error);
        })
    }
}

impl Deployment<Deployed> {
    /// Start an update.
    ///
    /// The prior release reference and properties are retained until the
    /// update commits, so an aborted update leaves nothing changed.
    #[must_use]
    pub fn begin_update(self) -> Deployment<Updating> {
        self.transition(|record| {
            record.error = None;
        })
    }

    /// Start a rollback towards an earlier release, adopting that
    /// release's properties.
    #[must_use]
    pub fn begin_rollback(self, properties: BTreeMap<String, String>) -> Deployment<Deploying> {
        self.transition(|record| {
            record.properties = properties;
            record.error = None;
        })
    }

    /// Tear down the live instantiation. Release history is retained.
    #[must_use]
    pub fn undeploy(self) -> Deployment<Undeployed> {
        self.transition(|record| {
            record.current_version = None;
            record.error = None;
        })
    }
}

impl Deployment<Updating> {
    /// Record backend confirmation: the new release version and its
    /// properties are now live.
    #[must_use]
    pub fn complete(
        self,
        version: u64,
        properties: BTreeMap<String, String>,
    ) -> Deployment<Deployed> {
        self.transition(|record| {
            record.current_version = Some(version);
            record.properties = properties;
            record.error = None;
        })
    }

    /// Abort the update: the prior release stays live and the state reverts.
    ///
    /// The failure message is retained on the record.
    #[must_use]
    pub fn abort(self, error: String) -> Deployment<Deployed> {
        self.transition(|record| {
            record.error = Some(error);
        })
    }
}

impl Deployment<Failed> {
    /// Retry a full deploy after a failure.
    #[must_use]
    pub fn begin_deploy(self, properties: BTreeMap<String, String>) -> Deployment<Deploying> {
        self.transition(|record| {
            record.properties = properties;
            record.error = None;
        })
    }

    /// Start a rollback towards a known-good release, adopting that
    /// release's properties.
    #[must_use]
    pub fn begin_rollback(self, properties: BTreeMap<String, String>) -> Deployment<Deploying> {
        self.transition(|record| {
            record.properties = properties;
            record.error = None;
        })
    }

    /// Clear the failed deployment. Release history is retained.
    #[must_use]
    pub fn undeploy(self) -> Deployment<Undeployed> {
        self.transition(|record| {
            record.current_version = None;
            record.error = None;
        })
    }
}

// =============================================================================
// Loading from persisted status
// =============================================================================

/// A type-erased deployment that can be in any lifecycle state.
///
/// Used when loading from the store where the status is not known at
/// compile time.
#[derive(Debug)]
pub enum AnyDeployment {
    /// Deployment in the undeployed state.
    Undeployed(Deployment<Undeployed>),
    /// Deployment in the deploying state.
    Deploying(Deployment<Deploying>),
    /// Deployment in the deployed state.
    Deployed(Deployment<Deployed>),
    /// Deployment in the updating state.
    Updating(Deployment<Updating>),
    /// Deployment in the failed state.
    Failed(Deployment<Failed>),
}

impl AnyDeployment {
    /// Create an `AnyDeployment` from a persisted record.
    #[must_use]
    pub const fn from_record(record: DeploymentRecord) -> Self {
        match record.status {
            DeploymentStatus::Undeployed => Self::Undeployed(Deployment {
                record,
                _state: PhantomData,
            }),
            DeploymentStatus::Deploying => Self::Deploying(Deployment {
                record,
                _state: PhantomData,
            }),
            DeploymentStatus::Deployed => Self::Deployed(Deployment {
                record,
                _state: PhantomData,
            }),
            DeploymentStatus::Updating => Self::Updating(Deployment {
                record,
                _state: PhantomData,
            }),
            DeploymentStatus::Failed => Self::Failed(Deployment {
                record,
                _state: PhantomData,
            }),
        }
    }

    /// Get a reference to the underlying record.
    #[must_use]
    pub const fn record(&self) -> &DeploymentRecord {
        match self {
            Self::Undeployed(d) => d.record(),
            Self::Deploying(d) => d.record(),
            Self::Deployed(d) => d.record(),
            Self::Updating(d) => d.record(),
            Self::Failed(d) => d.record(),
        }
    }

    /// Get the current status.
    #[must_use]
    pub const fn status(&self) -> DeploymentStatus {
        match self {
            Self::Undeployed(_) => DeploymentStatus::Undeployed,
            Self::Deploying(_) => DeploymentStatus::Deploying,
            Self::Deployed(_) => DeploymentStatus::Deployed,
            Self::Updating(_) => DeploymentStatus::Updating,
            Self::Failed(_) => DeploymentStatus::Failed,
        }
    }

    /// Try to extract a deployed deployment.
    ///
    /// Returns a conflict if the deployment is in any other state.
    pub fn try_into_deployed(self, operation: &'static str) -> FlowResult<Deployment<Deployed>> {
        match self {
            Self::Deployed(d) => Ok(d),
            other => Err(FlowError::conflict(
                other.record().stream.as_str(),
                operation,
                format!("stream is {}", other.status()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StreamName;

    fn test_record() -> DeploymentRecord {
        DeploymentRecord::new(StreamName::new("ticker").unwrap())
    }

    fn props(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn happy_path_deploy() {
        let undeployed = Deployment::<Undeployed>::create(test_record());
        assert_eq!(undeployed.status(), DeploymentStatus::Undeployed);

        let deploying = undeployed.begin_deploy(props(&[("cpu", "2")]));
        assert_eq!(deploying.status(), DeploymentStatus::Deploying);

        let deployed = deploying.complete(1);
        assert_eq!(deployed.status(), DeploymentStatus::Deployed);
        assert_eq!(deployed.record().current_version, Some(1));
        assert_eq!(deployed.record().properties.get("cpu").unwrap(), "2");
    }

    #[test]
    fn deploy_failure_keeps_error() {
        let deploying = Deployment::<Undeployed>::create(test_record()).begin_deploy(props(&[]));
        let failed = deploying.fail("backend unavailable".to_owned());
        assert_eq!(failed.status(), DeploymentStatus::Failed);
        assert_eq!(failed.record().error.as_deref(), Some("backend unavailable"));
        assert_eq!(failed.record().current_version, None);
    }

    #[test]
    fn update_abort_retains_prior_release_and_properties() {
        let deployed = Deployment::<Undeployed>::create(test_record())
            .begin_deploy(props(&[("cpu", "1")]))
            .complete(1);

        let updating = deployed.begin_update();
        assert_eq!(updating.record().current_version, Some(1));

        let reverted = updating.abort("package unresolvable".to_owned());
        assert_eq!(reverted.status(), DeploymentStatus::Deployed);
        assert_eq!(reverted.record().current_version, Some(1));
        assert_eq!(reverted.record().properties.get("cpu").unwrap(), "1");
    }

    #[test]
    fn update_commit_advances_release() {
        let deployed = Deployment::<Undeployed>::create(test_record())
            .begin_deploy(props(&[]))
            .complete(1);

        let committed = deployed.begin_update().complete(2, props(&[("mem", "512")]));
        assert_eq!(committed.record().current_version, Some(2));
        assert_eq!(committed.record().properties.get("mem").unwrap(), "512");
    }

    #[test]
    fn undeploy_clears_release_reference() {
        let deployed = Deployment::<Undeployed>::create(test_record())
            .begin_deploy(props(&[]))
            .complete(1);

        let undeployed = deployed.undeploy();
        assert_eq!(undeployed.status(), DeploymentStatus::Undeployed);
        assert_eq!(undeployed.record().current_version, None);
    }

    #[test]
    fn failed_can_rollback_or_redeploy() {
        let failed = Deployment::<Undeployed>::create(test_record())
            .begin_deploy(props(&[]))
            .fail("boom".to_owned());

        let rec = failed.into_record();
        let failed = match AnyDeployment::from_record(rec) {
            AnyDeployment::Failed(d) => d,
            other => panic!("expected failed, got {:?}", other.status()),
        };

        let deploying = failed.begin_rollback(props(&[]));
        assert_eq!(deploying.status(), DeploymentStatus::Deploying);
        assert_eq!(deploying.record().error, None);
    }

    #[test]
    fn any_deployment_round_trip() {
        let mut record = test_record();
        record.status = DeploymentStatus::Deployed;
        record.current_version = Some(3);

        let any = AnyDeployment::from_record(record);
        assert_eq!(any.status(), DeploymentStatus::Deployed);

        let deployed = any.try_into_deployed("update").unwrap();
        assert_eq!(deployed.record().current_version, Some(3));
    }

    #[test]
    fn try_into_deployed_wrong_state() {
        let any = AnyDeployment::from_record(test_record());
        let result = any.try_into_deployed("update");
        assert!(matches!(result, Err(FlowError::Conflict { .. })));
    }
}
