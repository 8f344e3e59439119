//! Pipeline coordinator.
//!
//! Owns the ingestion state machine, the per-document write locks, and the
//! wiring between the document store, search index, activity log, and
//! transform router. Handlers in `api` call into [`DocumentService`] only.

mod cancellation;
mod crud;
mod folders;
mod ingest;
mod locks;
mod transform;

pub use ingest::{IngestionStage, UploadRequest};
pub use transform::TransformRequest;

use bytes::Bytes;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{DynamicConfig, RuntimeConfig};
use crate::db::{ActivityEvent, ActivityLog, Database, DocumentStatus, DocumentStore};
use crate::error::{ServiceError, ServiceResult};
use crate::search::{SearchEntry, SearchIndex};
use crate::transform::TransformRouter;

/// Main service coordinator
pub struct DocumentService {
    pub runtime_config: Arc<RuntimeConfig>,
    /// Settings persistence
    db: Arc<Database>,
    store: Arc<dyn DocumentStore>,
    index: Arc<dyn SearchIndex>,
    activity: Arc<dyn ActivityLog>,
    router: TransformRouter,
    /// Serializes store+index writes per document id
    document_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    /// Cancellation handles for in-flight transforms, keyed by request id
    transform_tokens: DashMap<String, cancellation::RegisteredToken>,
}

impl DocumentService {
    /// Create a service backed by `db` for documents, activity, and settings
    pub fn new(
        runtime_config: Arc<RuntimeConfig>,
        db: Arc<Database>,
        index: Arc<dyn SearchIndex>,
        router: TransformRouter,
    ) -> Self {
        Self::with_components(
            runtime_config,
            db.clone(),
            db.clone(),
            index,
            db,
            router,
        )
    }

    /// Create a service with each collaborator supplied separately
    pub fn with_components(
        runtime_config: Arc<RuntimeConfig>,
        db: Arc<Database>,
        store: Arc<dyn DocumentStore>,
        index: Arc<dyn SearchIndex>,
        activity: Arc<dyn ActivityLog>,
        router: TransformRouter,
    ) -> Self {
        info!("Initializing document service");
        Self {
            runtime_config,
            db,
            store,
            index,
            activity,
            router,
            document_locks: DashMap::new(),
            transform_tokens: DashMap::new(),
        }
    }

    /// Whether the AI backend answers
    pub async fn ai_available(&self) -> bool {
        self.router.gateway().health_check().await
    }

    /// Populate the search index from every complete document.
    ///
    /// Documents left in `ingesting` by an interrupted run were never
    /// visible; they are discarded along with their raw files.
    pub fn rebuild_index(&self) -> ServiceResult<usize> {
        let mut indexed = 0;
        for doc in self.store.list(None)? {
            match doc.status {
                DocumentStatus::Complete => {
                    self.index.upsert(SearchEntry::from(&doc))?;
                    indexed += 1;
                }
                DocumentStatus::Ingesting => {
                    warn!(doc_id = %doc.id, "Discarding interrupted ingestion");
                    self.store.delete(&doc.id)?;
                    self.remove_raw_file(&doc.file_path);
                }
            }
        }

        info!(count = indexed, "Search index rebuilt");
        Ok(indexed)
    }

    /// Number of documents currently searchable
    pub fn indexed_documents(&self) -> usize {
        self.index.len()
    }

    /// Current dynamic settings as key/value pairs
    pub fn get_settings(&self) -> HashMap<String, serde_json::Value> {
        self.runtime_config.dynamic().to_key_value_map()
    }

    /// Keys with a persisted override, sorted
    pub fn setting_overrides(&self) -> ServiceResult<Vec<String>> {
        let mut keys: Vec<String> = self.db.get_all_settings()?.into_keys().collect();
        keys.sort();
        Ok(keys)
    }

    /// Persist setting overrides and hot-reload them.
    ///
    /// A `null` value reverts that key to its file/env default.
    pub fn update_settings(
        &self,
        updates: HashMap<String, serde_json::Value>,
    ) -> ServiceResult<HashMap<String, serde_json::Value>> {
        let valid_keys = DynamicConfig::valid_keys();
        for (key, value) in &updates {
            if !valid_keys.contains(key.as_str()) {
                return Err(ServiceError::InvalidRequest {
                    message: format!("Unknown setting: {key}"),
                });
            }
            let min = DynamicConfig::min_setting_value(key);
            if !(value.is_null() || value.as_u64().is_some_and(|v| v >= min)) {
                return Err(ServiceError::InvalidRequest {
                    message: format!("Setting {key} must be an integer of at least {min}, or null"),
                });
            }
        }

        self.db.set_settings(&updates)?;
        self.runtime_config.reload_from_db(&self.db)?;

        info!(keys = ?updates.keys().collect::<Vec<_>>(), "Settings updated");
        Ok(self.get_settings())
    }

    /// Record an activity event. Failures are logged and otherwise ignored.
    fn record(&self, event: ActivityEvent) {
        if let Err(e) = self.activity.record(&event) {
            warn!(
                doc_id = %event.document_id,
                kind = %event.kind,
                error = %e,
                "Failed to record activity"
            );
        }
    }

    fn remove_raw_file(&self, path: &str) {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path, "Removed raw file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path, error = %e, "Failed to remove raw file"),
        }
    }

    /// Bytes of a stored upload
    async fn read_raw_file(&self, path: &str) -> ServiceResult<Bytes> {
        tokio::fs::read(path)
            .await
            .map(Bytes::from)
            .map_err(|e| crate::error::StoreError::Io(e).into())
    }
}
