//! Per-stream mutual exclusion.
//!
//! Lifecycle operations on the same stream must be serialised to preserve
//! the version-monotonicity invariant and the single-in-flight rule, while
//! operations on distinct streams proceed concurrently. A single global
//! lock would serialise everything; instead each stream name gets its own
//! async mutex, created lazily.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

use crate::error::{FlowError, FlowResult};
use crate::types::StreamName;

/// Lazily created per-stream async mutexes.
#[derive(Debug, Default)]
pub(crate) struct StreamLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl StreamLocks {
    /// Acquire the lock for a stream, waiting if another lifecycle
    /// operation on the same stream is in flight.
    pub(crate) async fn acquire(&self, name: &StreamName) -> FlowResult<OwnedMutexGuard<()>> {
        let handle = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| FlowError::internal("lock poisoned"))?;
            Arc::clone(
                locks
                    .entry(name.as_str().to_owned())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };

        Ok(handle.lock_owned().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_stream_is_serialised() {
        let locks = Arc::new(StreamLocks::default());
        let name = StreamName::new("ticker").unwrap();

        let guard = locks.acquire(&name).await.unwrap();

        let contender = {
            let locks = Arc::clone(&locks);
            let name = name.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(&name).await.unwrap();
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .expect("contender should finish once the lock is released")
            .unwrap();
    }

    #[tokio::test]
    async fn distinct_streams_are_independent() {
        let locks = StreamLocks::default();

        let _first = locks
            .acquire(&StreamName::new("alpha").unwrap())
            .await
            .unwrap();
        let _second = locks
            .acquire(&StreamName::new("bravo").unwrap())
            .await
            .unwrap();
    }
}
