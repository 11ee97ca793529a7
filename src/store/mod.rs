//! Persistence backends for stream state.
//!
//! This module provides traits and implementations for persisting stream
//! definitions, deployment records and release history. The primary
//! implementation uses PostgreSQL, with an in-memory implementation for
//! testing and single-node fallback.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;

use crate::error::FlowResult;
use crate::types::{DeploymentRecord, Release, ReleaseDraft, StreamDefinition, StreamName};

/// A page of stream definitions with the total count.
#[derive(Debug, Clone)]
pub struct DefinitionPage {
    /// Definitions in stable insertion order, truncated to the page size.
    pub items: Vec<StreamDefinition>,
    /// Total number of definitions in the store.
    pub total: u64,
}

/// Backend for persisting stream state.
///
/// Implementations must provide optimistic-concurrency semantics for
/// deployment writes (`put_deployment`) and atomic version assignment for
/// release appends.
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Insert a new stream definition.
    ///
    /// Fails with `DuplicateStream` if the name is already defined.
    async fn insert_definition(&self, definition: &StreamDefinition) -> FlowResult<()>;

    /// Get a stream definition by name.
    ///
    /// Returns `None` if the stream does not exist.
    async fn get_definition(&self, name: &StreamName) -> FlowResult<Option<StreamDefinition>>;

    /// List stream definitions in stable insertion order.
    ///
    /// `limit` truncates the page; the total count is always returned.
    async fn list_definitions(&self, limit: Option<u32>) -> FlowResult<DefinitionPage>;

    /// Delete a stream and everything belonging to it (deployment record
    /// and release history included).
    ///
    /// Fails with `StreamNotFound` if the stream does not exist. Lifecycle
    /// preconditions (not deployed) are the caller's responsibility.
    async fn delete_stream(&self, name: &StreamName) -> FlowResult<()>;

    /// Get the deployment record for a stream.
    ///
    /// Returns `None` if the stream has never been deployed.
    async fn get_deployment(&self, name: &StreamName) -> FlowResult<Option<DeploymentRecord>>;

    /// Write a deployment record with optimistic concurrency.
    ///
    /// `record.meta.object_version` must be the value observed at read time
    /// (0 for a fresh record). On success the stored version is bumped and
    /// the new value returned; on mismatch the write fails with
    /// `ConcurrentModification` and nothing changes.
    async fn put_deployment(&self, record: &DeploymentRecord) -> FlowResult<i64>;

    /// Append a release, assigning the next sequential version for the
    /// stream atomically with respect to concurrent appends.
    async fn append_release(&self, draft: ReleaseDraft) -> FlowResult<Release>;

    /// Get a specific release by stream and version.
    ///
    /// Returns `None` if absent.
    async fn get_release(&self, name: &StreamName, version: u64) -> FlowResult<Option<Release>>;

    /// List releases for a stream, most recent first.
    ///
    /// Truncated to `limit` when given.
    async fn list_releases(&self, name: &StreamName, limit: Option<usize>)
        -> FlowResult<Vec<Release>>;
}
