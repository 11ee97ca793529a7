//! Core types for flowplane.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Generated identifier for a persisted entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Create an entity ID from an existing value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique entity ID using ULID.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity plus optimistic-lock counter embedded in each persisted entity.
///
/// A mutating write must carry the `object_version` observed at read time;
/// the store rejects the write with `ConcurrentModification` otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMeta {
    /// Stable identity of the entity.
    pub id: EntityId,
    /// Version observed at read time, bumped by every successful write.
    pub object_version: i64,
}

impl EntityMeta {
    /// Create metadata for a freshly created entity.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            id: EntityId::generate(),
            object_version: 0,
        }
    }
}

/// Name of a stream, the registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamName(String);

impl StreamName {
    /// Create a stream name. The name must be non-empty.
    pub fn new(name: impl Into<String>) -> crate::error::FlowResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(crate::error::FlowError::invalid_argument(
                "stream name",
                "name cannot be empty",
            ));
        }
        Ok(Self(name))
    }

    /// Get the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for StreamName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A named pipeline definition.
///
/// Immutable once created; removed only by destroy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDefinition {
    /// Identity and optimistic-lock version.
    #[serde(flatten)]
    pub meta: EntityMeta,
    /// Unique stream name.
    pub name: StreamName,
    /// DSL pipeline description, e.g. `time | log`.
    pub definition: String,
    /// When the stream was defined.
    pub created_at: DateTime<Utc>,
}

impl StreamDefinition {
    /// Create a new stream definition.
    #[must_use]
    pub fn new(name: StreamName, definition: impl Into<String>) -> Self {
        Self {
            meta: EntityMeta::generate(),
            name,
            definition: definition.into(),
            created_at: Utc::now(),
        }
    }
}

/// Name and version of a deployable package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageIdentifier {
    /// Package name.
    pub name: String,
    /// Package version.
    pub version: String,
}

impl PackageIdentifier {
    /// Parse a `name:version` pair. A missing version defaults to `latest`.
    #[must_use]
    pub fn parse(spec: &str) -> Self {
        match spec.split_once(':') {
            Some((name, version)) => Self {
                name: name.to_owned(),
                version: version.to_owned(),
            },
            None => Self {
                name: spec.to_owned(),
                version: "latest".to_owned(),
            },
        }
    }
}

impl fmt::Display for PackageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

/// Persisted deployment status for database storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// No live instantiation of the stream exists.
    Undeployed,
    /// A deploy or rollback is in flight with the backend.
    Deploying,
    /// The current release is live.
    Deployed,
    /// An update is in flight with the backend.
    Updating,
    /// The backend reported failure for the last lifecycle operation.
    Failed,
}

impl DeploymentStatus {
    /// Get the status name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Undeployed => "undeployed",
            Self::Deploying => "deploying",
            Self::Deployed => "deployed",
            Self::Updating => "updating",
            Self::Failed => "failed",
        }
    }

    /// Whether a lifecycle operation is currently in flight.
    #[must_use]
    pub const fn is_in_flight(&self) -> bool {
        matches!(self, Self::Deploying | Self::Updating)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "undeployed" => Ok(Self::Undeployed),
            "deploying" => Ok(Self::Deploying),
            "deployed" => Ok(Self::Deployed),
            "updating" => Ok(Self::Updating),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown deployment status: {s}")),
        }
    }
}

/// The deployment state of a stream as stored in the database.
///
/// At most one record exists per stream; an absent record is equivalent to
/// a record in the `Undeployed` status with no current release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Identity and optimistic-lock version.
    #[serde(flatten)]
    pub meta: EntityMeta,
    /// Owning stream name.
    pub stream: StreamName,
    /// Current lifecycle status.
    pub status: DeploymentStatus,
    /// Version of the release currently live, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_version: Option<u64>,
    /// Deployment properties supplied by the caller.
    pub properties: BTreeMap<String, String>,
    /// Error message if the last operation failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

impl DeploymentRecord {
    /// Create a fresh record in the undeployed status.
    #[must_use]
    pub fn new(stream: StreamName) -> Self {
        Self {
            meta: EntityMeta::generate(),
            stream,
            status: DeploymentStatus::Undeployed,
            current_version: None,
            properties: BTreeMap::new(),
            error: None,
            updated_at: Utc::now(),
        }
    }
}

/// An immutable, versioned snapshot of what was deployed for a stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    /// Owning stream name.
    pub stream: StreamName,
    /// Monotonically increasing version, contiguous from 1 per stream.
    pub version: u64,
    /// The deployed package.
    pub package: PackageIdentifier,
    /// Rendered deployment artifact.
    pub manifest: String,
    /// Properties in effect at this version.
    pub properties: BTreeMap<String, String>,
    /// When the release was recorded.
    pub created_at: DateTime<Utc>,
}

/// A release awaiting version assignment by the store.
#[derive(Debug, Clone)]
pub struct ReleaseDraft {
    /// Owning stream name.
    pub stream: StreamName,
    /// The package being deployed.
    pub package: PackageIdentifier,
    /// Rendered deployment artifact.
    pub manifest: String,
    /// Properties in effect.
    pub properties: BTreeMap<String, String>,
}

/// Outcome of a best-effort batch operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    /// Streams for which the operation succeeded (no-ops included).
    pub succeeded: Vec<String>,
    /// Streams for which the operation failed, with the error message.
    pub failed: Vec<BatchFailure>,
}

/// A single per-stream failure within a batch operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFailure {
    /// Stream name.
    pub stream: String,
    /// Why the operation failed for this stream.
    pub error: String,
}

impl BatchReport {
    /// Whether every item in the batch succeeded.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_name_rejects_empty() {
        assert!(StreamName::new("").is_err());
        assert!(StreamName::new("  ").is_err());
        assert!(StreamName::new("ticker").is_ok());
    }

    #[test]
    fn package_identifier_parse() {
        let pkg = PackageIdentifier::parse("ticktock:1.2.0");
        assert_eq!(pkg.name, "ticktock");
        assert_eq!(pkg.version, "1.2.0");

        let bare = PackageIdentifier::parse("ticktock");
        assert_eq!(bare.version, "latest");

        assert_eq!(pkg.to_string(), "ticktock:1.2.0");
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            DeploymentStatus::Undeployed,
            DeploymentStatus::Deploying,
            DeploymentStatus::Deployed,
            DeploymentStatus::Updating,
            DeploymentStatus::Failed,
        ] {
            let parsed: DeploymentStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("bogus".parse::<DeploymentStatus>().is_err());
    }

    #[test]
    fn fresh_record_is_undeployed() {
        let record = DeploymentRecord::new(StreamName::new("ticker").unwrap());
        assert_eq!(record.status, DeploymentStatus::Undeployed);
        assert_eq!(record.current_version, None);
        assert_eq!(record.meta.object_version, 0);
    }

    #[test]
    fn in_flight_statuses() {
        assert!(DeploymentStatus::Deploying.is_in_flight());
        assert!(DeploymentStatus::Updating.is_in_flight());
        assert!(!DeploymentStatus::Deployed.is_in_flight());
        assert!(!DeploymentStatus::Undeployed.is_in_flight());
        assert!(!DeploymentStatus::Failed.is_in_flight());
    }
}
