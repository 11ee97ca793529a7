//! Append-only release history.
//!
//! Every successful deploy, update and rollback appends exactly one
//! release. History is never rewritten, only extended; rollback records a
//! new release whose content copies an earlier version.

use std::sync::Arc;

use crate::error::{FlowError, FlowResult};
use crate::store::FlowStore;
use crate::types::{Release, ReleaseDraft, StreamName};

/// Release history reader/appender for all streams.
pub struct ReleaseHistory {
    store: Arc<dyn FlowStore>,
}

impl ReleaseHistory {
    /// Create a new release history over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn FlowStore>) -> Self {
        Self { store }
    }

    /// Append a release. The store assigns the next sequential version
    /// atomically with respect to concurrent appends for the same stream.
    pub async fn append(&self, draft: ReleaseDraft) -> FlowResult<Release> {
        self.store.append_release(draft).await
    }

    /// Get a specific release.
    ///
    /// Fails with `ReleaseNotFound` if the version is unknown.
    pub async fn get(&self, name: &StreamName, version: u64) -> FlowResult<Release> {
        self.store
            .get_release(name, version)
            .await?
            .ok_or_else(|| FlowError::ReleaseNotFound {
                stream: name.to_string(),
                version,
            })
    }

    /// Get the most recent release for a stream, if any.
    pub async fn latest(&self, name: &StreamName) -> FlowResult<Option<Release>> {
        let mut releases = self.store.list_releases(name, Some(1)).await?;
        Ok(releases.pop())
    }

    /// Get the manifest for a release.
    ///
    /// `None` selects the latest release. Fails with `StreamNotFound` when
    /// the stream has no releases at all, or `ReleaseNotFound` for an
    /// unknown explicit version.
    pub async fn manifest(&self, name: &StreamName, version: Option<u64>) -> FlowResult<String> {
        match version {
            Some(version) => Ok(self.get(name, version).await?.manifest),
            None => self
                .latest(name)
                .await?
                .map(|release| release.manifest)
                .ok_or_else(|| FlowError::not_found(name.as_str(), "manifest")),
        }
    }

    /// List releases, most recent first.
    ///
    /// Truncated to `max_revisions` when positive, unbounded otherwise.
    pub async fn list(
        &self,
        name: &StreamName,
        max_revisions: Option<usize>,
    ) -> FlowResult<Vec<Release>> {
        let limit = max_revisions.filter(|&max| max > 0);
        self.store.list_releases(name, limit).await
    }
}

impl std::fmt::Debug for ReleaseHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseHistory").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::PackageIdentifier;
    use std::collections::BTreeMap;

    fn name(s: &str) -> StreamName {
        StreamName::new(s).unwrap()
    }

    fn draft(stream: &str, manifest: &str) -> ReleaseDraft {
        ReleaseDraft {
            stream: name(stream),
            package: PackageIdentifier::parse("ticktock:1.0.0"),
            manifest: manifest.to_owned(),
            properties: BTreeMap::new(),
        }
    }

    fn make_history() -> ReleaseHistory {
        ReleaseHistory::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn append_assigns_sequential_versions() {
        let history = make_history();

        let first = history.append(draft("ticker", "m1")).await.unwrap();
        let second = history.append(draft("ticker", "m2")).await.unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
    }

    #[tokio::test]
    async fn manifest_latest_and_by_version() {
        let history = make_history();
        history.append(draft("ticker", "m1")).await.unwrap();
        history.append(draft("ticker", "m2")).await.unwrap();

        assert_eq!(history.manifest(&name("ticker"), None).await.unwrap(), "m2");
        assert_eq!(
            history.manifest(&name("ticker"), Some(1)).await.unwrap(),
            "m1"
        );
    }

    #[tokio::test]
    async fn manifest_unknown_version_fails() {
        let history = make_history();
        history.append(draft("ticker", "m1")).await.unwrap();

        let result = history.manifest(&name("ticker"), Some(9)).await;
        assert!(matches!(result, Err(FlowError::ReleaseNotFound { .. })));
    }

    #[tokio::test]
    async fn manifest_for_stream_without_releases_fails() {
        let history = make_history();
        let result = history.manifest(&name("ghost"), None).await;
        assert!(matches!(result, Err(FlowError::StreamNotFound { .. })));
    }

    #[tokio::test]
    async fn list_truncates_and_orders_newest_first() {
        let history = make_history();
        for manifest in ["m1", "m2", "m3"] {
            history.append(draft("ticker", manifest)).await.unwrap();
        }

        let one = history.list(&name("ticker"), Some(1)).await.unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].version, 3);

        // Non-positive max means unbounded.
        let all = history.list(&name("ticker"), Some(0)).await.unwrap();
        assert_eq!(all.len(), 3);

        let all = history.list(&name("ticker"), None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].version, 3);
        assert_eq!(all[2].version, 1);
    }
}
