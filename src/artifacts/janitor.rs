//! Deferred artifact cleanup
//!
//! Delivered artifacts are not deleted inline. The egress stage hands
//! them to the janitor, which drains its bounded list between messages
//! and reports every failure.

use super::traits::ArtifactStore;
use crate::messages::ArtifactRef;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub deleted: usize,
    /// Already gone when the janitor got to them
    pub missing: usize,
    /// Deletes that errored; these references are dropped after logging
    pub failed: Vec<ArtifactRef>,
}

pub struct ArtifactJanitor {
    store: Arc<dyn ArtifactStore>,
    pending: Mutex<VecDeque<ArtifactRef>>,
    capacity: usize,
}

impl ArtifactJanitor {
    pub fn new(store: Arc<dyn ArtifactStore>, capacity: usize) -> Self {
        Self {
            store,
            pending: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Schedule an artifact for deletion. Returns false when the list is
    /// full; the caller should drain before deferring more.
    pub fn defer(&self, reference: ArtifactRef) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        if pending.len() >= self.capacity {
            return false;
        }
        pending.push_back(reference);
        true
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Delete everything scheduled so far.
    pub async fn drain(&self) -> DrainReport {
        let batch: Vec<ArtifactRef> = {
            let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
            pending.drain(..).collect()
        };

        let mut report = DrainReport::default();
        for reference in batch {
            match self.store.delete(&reference).await {
                Ok(true) => {
                    debug!(artifact = %reference, "artifact removed");
                    report.deleted += 1;
                }
                Ok(false) => report.missing += 1,
                Err(e) => {
                    warn!(artifact = %reference, error = %e, "artifact cleanup failed");
                    report.failed.push(reference);
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::FsArtifactStore;
    use crate::messages::DataType;
    use tempfile::TempDir;

    #[tokio::test]
    async fn drain_deletes_deferred_artifacts() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FsArtifactStore::open(dir.path()).unwrap());
        let janitor = ArtifactJanitor::new(store.clone(), 8);

        let a = store.put(b"a", DataType::Png).await.unwrap();
        let b = store.put(b"b", DataType::Png).await.unwrap();
        assert!(janitor.defer(a.clone()));
        assert!(janitor.defer(b));
        assert!(janitor.defer(a));

        let report = janitor.drain().await;
        assert_eq!(report.deleted, 2);
        assert_eq!(report.missing, 1);
        assert!(report.failed.is_empty());
        assert_eq!(janitor.pending(), 0);
    }

    #[tokio::test]
    async fn malformed_reference_is_reported_not_swallowed() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FsArtifactStore::open(dir.path()).unwrap());
        let janitor = ArtifactJanitor::new(store, 8);

        janitor.defer(ArtifactRef::new("../escape"));
        let report = janitor.drain().await;
        assert_eq!(report.failed, vec![ArtifactRef::new("../escape")]);
    }

    #[test]
    fn defer_refuses_past_capacity() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FsArtifactStore::open(dir.path()).unwrap());
        let janitor = ArtifactJanitor::new(store, 1);

        assert!(janitor.defer(ArtifactRef::new("x")));
        assert!(!janitor.defer(ArtifactRef::new("y")));
    }
}
