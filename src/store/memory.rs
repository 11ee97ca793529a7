//! In-memory store for testing and single-node fallback.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{FlowError, FlowResult};
use crate::types::{DeploymentRecord, Release, ReleaseDraft, StreamDefinition, StreamName};

use super::{DefinitionPage, FlowStore};

/// In-memory store.
///
/// Not suitable for production use as data is lost when the process exits.
/// All invariants of [`FlowStore`] (optimistic concurrency, contiguous
/// release versions) are enforced the same way the PostgreSQL store does.
#[derive(Debug, Default)]
pub struct MemoryStore {
    definitions: RwLock<Vec<StreamDefinition>>,
    deployments: RwLock<HashMap<String, DeploymentRecord>>,
    releases: RwLock<HashMap<String, Vec<Release>>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FlowStore for MemoryStore {
    async fn insert_definition(&self, definition: &StreamDefinition) -> FlowResult<()> {
        let mut definitions = self
            .definitions
            .write()
            .map_err(|_| FlowError::internal("lock poisoned"))?;

        if definitions.iter().any(|d| d.name == definition.name) {
            return Err(FlowError::DuplicateStream {
                stream: definition.name.to_string(),
            });
        }

        definitions.push(definition.clone());
        Ok(())
    }

    async fn get_definition(&self, name: &StreamName) -> FlowResult<Option<StreamDefinition>> {
        let definitions = self
            .definitions
            .read()
            .map_err(|_| FlowError::internal("lock poisoned"))?;

        Ok(definitions.iter().find(|d| &d.name == name).cloned())
    }

    async fn list_definitions(&self, limit: Option<u32>) -> FlowResult<DefinitionPage> {
        let definitions = self
            .definitions
            .read()
            .map_err(|_| FlowError::internal("lock poisoned"))?;

        let total = definitions.len() as u64;
        let items = match limit {
            Some(limit) => definitions.iter().take(limit as usize).cloned().collect(),
            None => definitions.clone(),
        };

        Ok(DefinitionPage { items, total })
    }

    async fn delete_stream(&self, name: &StreamName) -> FlowResult<()> {
        let mut definitions = self
            .definitions
            .write()
            .map_err(|_| FlowError::internal("lock poisoned"))?;

        let before = definitions.len();
        definitions.retain(|d| &d.name != name);
        if definitions.len() == before {
            return Err(FlowError::not_found(name.as_str(), "destroy"));
        }
        drop(definitions);

        let mut deployments = self
            .deployments
            .write()
            .map_err(|_| FlowError::internal("lock poisoned"))?;
        deployments.remove(name.as_str());
        drop(deployments);

        let mut releases = self
            .releases
            .write()
            .map_err(|_| FlowError::internal("lock poisoned"))?;
        releases.remove(name.as_str());

        Ok(())
    }

    async fn get_deployment(&self, name: &StreamName) -> FlowResult<Option<DeploymentRecord>> {
        let deployments = self
            .deployments
            .read()
            .map_err(|_| FlowError::internal("lock poisoned"))?;

        Ok(deployments.get(name.as_str()).cloned())
    }

    async fn put_deployment(&self, record: &DeploymentRecord) -> FlowResult<i64> {
        let mut deployments = self
            .deployments
            .write()
            .map_err(|_| FlowError::internal("lock poisoned"))?;

        let key = record.stream.as_str().to_owned();
        match deployments.get(&key) {
            Some(existing) if existing.meta.object_version != record.meta.object_version => {
                return Err(FlowError::ConcurrentModification {
                    stream: record.stream.to_string(),
                });
            }
            None if record.meta.object_version != 0 => {
                return Err(FlowError::ConcurrentModification {
                    stream: record.stream.to_string(),
                });
            }
            _ => {}
        }

        let mut stored = record.clone();
        stored.meta.object_version += 1;
        let new_version = stored.meta.object_version;
        deployments.insert(key, stored);

        Ok(new_version)
    }

    async fn append_release(&self, draft: ReleaseDraft) -> FlowResult<Release> {
        let mut releases = self
            .releases
            .write()
            .map_err(|_| FlowError::internal("lock poisoned"))?;

        let history = releases.entry(draft.stream.as_str().to_owned()).or_default();
        let version = history.last().map_or(1, |r| r.version + 1);

        let release = Release {
            stream: draft.stream,
            version,
            package: draft.package,
            manifest: draft.manifest,
            properties: draft.properties,
            created_at: chrono::Utc::now(),
        };

        history.push(release.clone());
        Ok(release)
    }

    async fn get_release(&self, name: &StreamName, version: u64) -> FlowResult<Option<Release>> {
        let releases = self
            .releases
            .read()
            .map_err(|_| FlowError::internal("lock poisoned"))?;

        Ok(releases
            .get(name.as_str())
            .and_then(|history| history.iter().find(|r| r.version == version).cloned()))
    }

    async fn list_releases(
        &self,
        name: &StreamName,
        limit: Option<usize>,
    ) -> FlowResult<Vec<Release>> {
        let releases = self
            .releases
            .read()
            .map_err(|_| FlowError::internal("lock poisoned"))?;

        let mut history: Vec<Release> = releases
            .get(name.as_str())
            .map(|h| h.clone())
            .unwrap_or_default();

        history.reverse();
        if let Some(limit) = limit {
            history.truncate(limit);
        }

        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PackageIdentifier;
    use std::collections::BTreeMap;

    fn name(s: &str) -> StreamName {
        StreamName::new(s).unwrap()
    }

    fn test_definition(stream: &str) -> StreamDefinition {
        StreamDefinition::new(name(stream), "time | log")
    }

    fn test_draft(stream: &str) -> ReleaseDraft {
        ReleaseDraft {
            stream: name(stream),
            package: PackageIdentifier::parse("ticktock:1.0.0"),
            manifest: "manifest".to_owned(),
            properties: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn insert_and_get_definition() {
        let store = MemoryStore::new();
        store
            .insert_definition(&test_definition("ticker"))
            .await
            .expect("insert failed");

        let retrieved = store
            .get_definition(&name("ticker"))
            .await
            .expect("get failed")
            .expect("definition not found");
        assert_eq!(retrieved.definition, "time | log");
    }

    #[tokio::test]
    async fn duplicate_definition_fails() {
        let store = MemoryStore::new();
        store
            .insert_definition(&test_definition("ticker"))
            .await
            .expect("first insert failed");

        let result = store.insert_definition(&test_definition("ticker")).await;
        assert!(matches!(result, Err(FlowError::DuplicateStream { .. })));
    }

    #[tokio::test]
    async fn list_preserves_insertion_order() {
        let store = MemoryStore::new();
        for stream in ["charlie", "alpha", "bravo"] {
            store
                .insert_definition(&test_definition(stream))
                .await
                .expect("insert failed");
        }

        let page = store.list_definitions(None).await.expect("list failed");
        let names: Vec<&str> = page.items.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["charlie", "alpha", "bravo"]);
        assert_eq!(page.total, 3);

        let page = store.list_definitions(Some(2)).await.expect("list failed");
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total, 3);
    }

    #[tokio::test]
    async fn delete_stream_removes_everything() {
        let store = MemoryStore::new();
        store
            .insert_definition(&test_definition("ticker"))
            .await
            .expect("insert failed");
        store
            .put_deployment(&DeploymentRecord::new(name("ticker")))
            .await
            .expect("put failed");
        store
            .append_release(test_draft("ticker"))
            .await
            .expect("append failed");

        store.delete_stream(&name("ticker")).await.expect("delete failed");

        assert!(store
            .get_definition(&name("ticker"))
            .await
            .unwrap()
            .is_none());
        assert!(store
            .get_deployment(&name("ticker"))
            .await
            .unwrap()
            .is_none());
        assert!(store
            .list_releases(&name("ticker"), None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn delete_unknown_stream_fails() {
        let store = MemoryStore::new();
        let result = store.delete_stream(&name("ghost")).await;
        assert!(matches!(result, Err(FlowError::StreamNotFound { .. })));
    }

    #[tokio::test]
    async fn put_deployment_bumps_object_version() {
        let store = MemoryStore::new();
        let mut record = DeploymentRecord::new(name("ticker"));

        let v1 = store.put_deployment(&record).await.expect("put failed");
        assert_eq!(v1, 1);

        record.meta.object_version = v1;
        let v2 = store.put_deployment(&record).await.expect("put failed");
        assert_eq!(v2, 2);
    }

    #[tokio::test]
    async fn stale_write_is_rejected() {
        let store = MemoryStore::new();
        let record = DeploymentRecord::new(name("ticker"));

        store.put_deployment(&record).await.expect("put failed");

        // Write again with the stale object_version of 0.
        let result = store.put_deployment(&record).await;
        assert!(matches!(
            result,
            Err(FlowError::ConcurrentModification { .. })
        ));
    }

    #[tokio::test]
    async fn release_versions_are_contiguous_from_one() {
        let store = MemoryStore::new();

        for expected in 1..=4u64 {
            let release = store
                .append_release(test_draft("ticker"))
                .await
                .expect("append failed");
            assert_eq!(release.version, expected);
        }

        let history = store
            .list_releases(&name("ticker"), None)
            .await
            .expect("list failed");
        let versions: Vec<u64> = history.iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![4, 3, 2, 1]);
    }

    #[tokio::test]
    async fn list_releases_truncates_to_limit() {
        let store = MemoryStore::new();
        for _ in 0..3 {
            store
                .append_release(test_draft("ticker"))
                .await
                .expect("append failed");
        }

        let latest = store
            .list_releases(&name("ticker"), Some(1))
            .await
            .expect("list failed");
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].version, 3);
    }

    #[tokio::test]
    async fn get_release_by_version() {
        let store = MemoryStore::new();
        store
            .append_release(test_draft("ticker"))
            .await
            .expect("append failed");

        assert!(store
            .get_release(&name("ticker"), 1)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .get_release(&name("ticker"), 2)
            .await
            .unwrap()
            .is_none());
    }
}
