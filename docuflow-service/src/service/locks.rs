//! Per-document write locks.

use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

use crate::service::DocumentService;

impl DocumentService {
    /// Wait for exclusive write access to one document id.
    ///
    /// Writers to different ids never contend.
    pub(crate) async fn lock_document(&self, document_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .document_locks
            .entry(document_id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Drop the lock entry once nobody holds or waits on it.
    ///
    /// Call after the guard from [`lock_document`](Self::lock_document) is dropped.
    pub(crate) fn release_document_lock(&self, document_id: &str) {
        self.document_locks
            .remove_if(document_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
