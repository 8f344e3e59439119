//! Document reads, metadata updates, deletion, and search.

use bytes::Bytes;
use tracing::{error, info, warn};

use crate::db::{
    ActivityEvent, ActivityKind, Document, DocumentStatus, ImageInfo, MetadataUpdate,
};
use crate::error::{ServiceError, ServiceResult};
use crate::ingestion::TextBlock;
use crate::search::{SearchEntry, SearchFilters};
use crate::service::DocumentService;
use crate::service::ingest::normalize_tags;

/// Upper bound on activity entries returned per request
pub const MAX_ACTIVITY_ENTRIES: usize = 500;

impl DocumentService {
    /// Get a document by ID
    pub fn get_document(&self, document_id: &str) -> ServiceResult<Document> {
        self.store
            .get(document_id)?
            .ok_or_else(|| ServiceError::DocumentNotFound {
                document_id: document_id.to_string(),
            })
    }

    /// List complete documents, newest first
    pub fn list_documents(&self) -> ServiceResult<Vec<Document>> {
        Ok(self.store.list(Some(DocumentStatus::Complete))?)
    }

    /// Documents matching every supplied filter, in index order
    pub fn search(&self, filters: &SearchFilters) -> ServiceResult<Vec<Document>> {
        let ids = self.index.query(filters)?;

        let mut docs = Vec::with_capacity(ids.len());
        for id in ids {
            // Skip entries whose document vanished or is still mid-ingestion
            match self.store.get(&id)? {
                Some(doc) if doc.status == DocumentStatus::Complete => docs.push(doc),
                _ => {}
            }
        }
        Ok(docs)
    }

    pub fn text_blocks(&self, document_id: &str) -> ServiceResult<Vec<TextBlock>> {
        self.get_document(document_id)?;
        Ok(self.store.text_blocks(document_id)?)
    }

    pub fn list_images(&self, document_id: &str) -> ServiceResult<Vec<ImageInfo>> {
        self.get_document(document_id)?;
        Ok(self.store.list_images(document_id)?)
    }

    pub fn get_image(&self, document_id: &str, index: usize) -> ServiceResult<(ImageInfo, Vec<u8>)> {
        self.get_document(document_id)?;
        self.store
            .get_image(document_id, index)?
            .ok_or_else(|| ServiceError::ImageNotFound {
                document_id: document_id.to_string(),
                index,
            })
    }

    /// The document record and its raw upload bytes
    pub async fn download(&self, document_id: &str) -> ServiceResult<(Document, Bytes)> {
        let doc = self.get_document(document_id)?;
        let bytes = self.read_raw_file(&doc.file_path).await?;
        Ok((doc, bytes))
    }

    /// Change a document's title, tags, or folder, keeping its search entry in step
    pub async fn update_metadata(
        &self,
        document_id: &str,
        actor: &str,
        update: MetadataUpdate,
    ) -> ServiceResult<Document> {
        let update = MetadataUpdate {
            title: match update.title {
                Some(title) if title.trim().is_empty() => {
                    return Err(ServiceError::InvalidRequest {
                        message: "title must not be empty".to_string(),
                    });
                }
                Some(title) => Some(title.trim().to_string()),
                None => None,
            },
            tags: update.tags.map(normalize_tags),
            folder_id: match update.folder_id {
                Some(Some(folder_id)) => {
                    let folder_id = folder_id.trim().to_string();
                    self.get_folder(&folder_id)?;
                    Some(Some(folder_id))
                }
                other => other,
            },
        };

        let guard = self.lock_document(document_id).await;
        let result = self.apply_metadata_update(document_id, &update);
        drop(guard);
        self.release_document_lock(document_id);

        let doc = result?;
        info!(doc_id = %document_id, title = %doc.title, tags = ?doc.tags, "Metadata updated");
        self.record(
            ActivityEvent::new(ActivityKind::MetadataUpdated, document_id, actor)
                .with_detail(describe_update(&update)),
        );
        Ok(doc)
    }

    fn apply_metadata_update(
        &self,
        document_id: &str,
        update: &MetadataUpdate,
    ) -> ServiceResult<Document> {
        let doc = self
            .store
            .update_metadata(document_id, update)?
            .ok_or_else(|| ServiceError::DocumentNotFound {
                document_id: document_id.to_string(),
            })?;

        if doc.status == DocumentStatus::Complete {
            if let Err(e) = self.index.upsert(SearchEntry::from(&doc)) {
                error!(doc_id = %document_id, error = %e, "Search entry is stale after metadata update");
                return Err(e.into());
            }
        }

        Ok(doc)
    }

    /// Delete a document, its artifacts, its raw file, and its search entry
    pub async fn delete_document(&self, document_id: &str, actor: &str) -> ServiceResult<()> {
        let guard = self.lock_document(document_id).await;
        let result = self.remove_document(document_id);
        drop(guard);
        self.release_document_lock(document_id);

        let doc = result?;
        info!(doc_id = %document_id, title = %doc.title, "Document deleted");
        self.record(
            ActivityEvent::new(ActivityKind::Deleted, document_id, actor).with_detail(doc.title),
        );
        Ok(())
    }

    fn remove_document(&self, document_id: &str) -> ServiceResult<Document> {
        let doc = self.get_document(document_id)?;

        // Hide from search before the rows go away
        self.index.remove(document_id)?;

        if let Err(e) = self.store.delete(document_id) {
            if doc.status == DocumentStatus::Complete {
                if let Err(restore_err) = self.index.upsert(SearchEntry::from(&doc)) {
                    error!(
                        doc_id = %document_id,
                        error = %restore_err,
                        "Failed to restore search entry after failed delete"
                    );
                } else {
                    warn!(doc_id = %document_id, "Delete failed; search entry restored");
                }
            }
            return Err(e.into());
        }

        self.remove_raw_file(&doc.file_path);
        Ok(doc)
    }

    /// Activity entries, newest first
    pub fn activity(
        &self,
        document_id: Option<&str>,
        limit: Option<usize>,
    ) -> ServiceResult<Vec<ActivityEvent>> {
        let limit = limit
            .unwrap_or(MAX_ACTIVITY_ENTRIES)
            .clamp(1, MAX_ACTIVITY_ENTRIES);
        Ok(self.activity.entries(document_id, limit)?)
    }
}

fn describe_update(update: &MetadataUpdate) -> String {
    let mut parts = Vec::new();
    if let Some(title) = &update.title {
        parts.push(format!("title={title}"));
    }
    if let Some(tags) = &update.tags {
        parts.push(format!("tags={}", tags.join(",")));
    }
    match &update.folder_id {
        Some(Some(folder_id)) => parts.push(format!("folder={folder_id}")),
        Some(None) => parts.push("folder=none".to_string()),
        None => {}
    }
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::db::{Database, DocumentStore};
    use crate::error::StoreError;
    use crate::ingestion::ExtractedArtifact;
    use crate::search::{MemorySearchIndex, SearchIndex, TitleMatch};
    use crate::service::tests::{docx_upload, harness, harness_with};

    #[tokio::test]
    async fn test_update_metadata_is_visible_to_search() {
        let h = harness();
        let doc = h.service.ingest(docx_upload("Body text", "alice")).await.unwrap();

        let updated = h
            .service
            .update_metadata(
                &doc.id,
                "alice",
                MetadataUpdate {
                    title: Some("  Budget 2025 ".to_string()),
                    tags: Some(vec!["finance".to_string(), " FINANCE".to_string()]),
                    folder_id: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "Budget 2025");
        assert_eq!(updated.tags, vec!["finance"]);

        let by_title = h
            .service
            .search(&SearchFilters {
                title: Some(TitleMatch::Exact("budget 2025".to_string())),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_title.len(), 1);

        let old_title = h
            .service
            .search(&SearchFilters {
                title: Some(TitleMatch::Exact("notes.docx".to_string())),
                ..Default::default()
            })
            .unwrap();
        assert!(old_title.is_empty());

        let events = h.service.activity(Some(&doc.id), None).unwrap();
        assert_eq!(events[0].kind, ActivityKind::MetadataUpdated);
    }

    #[tokio::test]
    async fn test_update_metadata_rejects_blank_title() {
        let h = harness();
        let doc = h.service.ingest(docx_upload("Body text", "alice")).await.unwrap();
        let err = h
            .service
            .update_metadata(
                &doc.id,
                "alice",
                MetadataUpdate {
                    title: Some("   ".to_string()),
                    tags: None,
                    folder_id: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_update_metadata_missing_document() {
        let h = harness();
        let err = h
            .service
            .update_metadata("ghost", "alice", MetadataUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::DocumentNotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_removes_everything() {
        let h = harness();
        let doc = h.service.ingest(docx_upload("Delete me", "alice")).await.unwrap();
        let raw_path = h.db.get(&doc.id).unwrap().unwrap().file_path;

        h.service.delete_document(&doc.id, "admin").await.unwrap();

        assert!(matches!(
            h.service.get_document(&doc.id),
            Err(ServiceError::DocumentNotFound { .. })
        ));
        assert!(h.service.search(&SearchFilters::default()).unwrap().is_empty());
        assert!(h.db.get_artifact(&doc.id).unwrap().is_none());
        assert!(!std::path::Path::new(&raw_path).exists());

        let events = h.service.activity(Some(&doc.id), None).unwrap();
        assert_eq!(events[0].kind, ActivityKind::Deleted);
        assert_eq!(events[0].actor_id, "admin");
    }

    #[tokio::test]
    async fn test_delete_missing_document() {
        let h = harness();
        assert!(matches!(
            h.service.delete_document("ghost", "admin").await,
            Err(ServiceError::DocumentNotFound { .. })
        ));
    }

    /// Store whose deletes always fail
    struct UndeletableStore(Arc<Database>);

    impl DocumentStore for UndeletableStore {
        fn save(&self, doc: &Document, artifact: &ExtractedArtifact) -> Result<(), StoreError> {
            self.0.save(doc, artifact)
        }
        fn get(&self, id: &str) -> Result<Option<Document>, StoreError> {
            DocumentStore::get(self.0.as_ref(), id)
        }
        fn get_artifact(&self, id: &str) -> Result<Option<ExtractedArtifact>, StoreError> {
            self.0.get_artifact(id)
        }
        fn text_blocks(&self, id: &str) -> Result<Vec<TextBlock>, StoreError> {
            self.0.text_blocks(id)
        }
        fn list_images(&self, id: &str) -> Result<Vec<ImageInfo>, StoreError> {
            self.0.list_images(id)
        }
        fn get_image(
            &self,
            id: &str,
            index: usize,
        ) -> Result<Option<(ImageInfo, Vec<u8>)>, StoreError> {
            self.0.get_image(id, index)
        }
        fn delete(&self, _id: &str) -> Result<bool, StoreError> {
            Err(StoreError::LockPoisoned)
        }
        fn update_metadata(
            &self,
            id: &str,
            update: &MetadataUpdate,
        ) -> Result<Option<Document>, StoreError> {
            self.0.update_metadata(id, update)
        }
        fn set_status(&self, id: &str, status: DocumentStatus) -> Result<bool, StoreError> {
            self.0.set_status(id, status)
        }
        fn list(&self, status: Option<DocumentStatus>) -> Result<Vec<Document>, StoreError> {
            self.0.list(status)
        }
    }

    #[tokio::test]
    async fn test_failed_delete_restores_search_entry() {
        let index = Arc::new(MemorySearchIndex::new());
        let h = harness_with(
            |db| Arc::new(UndeletableStore(db.clone())) as Arc<dyn DocumentStore>,
            index.clone(),
        );
        let doc = h.service.ingest(docx_upload("Sticky", "alice")).await.unwrap();

        let err = h.service.delete_document(&doc.id, "alice").await.unwrap_err();

        assert_eq!(err.error_code(), "store_failure");
        assert!(index.contains(&doc.id));
        assert!(h.service.get_document(&doc.id).is_ok());
    }

    #[tokio::test]
    async fn test_image_lookup_errors() {
        let h = harness();
        let doc = h.service.ingest(docx_upload("No pictures", "alice")).await.unwrap();

        assert!(h.service.list_images(&doc.id).unwrap().is_empty());
        assert!(matches!(
            h.service.get_image(&doc.id, 0),
            Err(ServiceError::ImageNotFound { index: 0, .. })
        ));
        assert!(matches!(
            h.service.get_image("ghost", 0),
            Err(ServiceError::DocumentNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_download_returns_original_bytes() {
        let h = harness();
        let upload = docx_upload("Raw bytes", "alice");
        let original = upload.bytes.clone();
        let doc = h.service.ingest(upload).await.unwrap();

        let (stored, bytes) = h.service.download(&doc.id).await.unwrap();
        assert_eq!(stored.filename, "notes.docx");
        assert_eq!(bytes, original);
    }

    #[tokio::test]
    async fn test_search_by_uploader_and_keyword() {
        let h = harness();
        let a = h.service.ingest(docx_upload("One", "alice")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let b = h.service.ingest(docx_upload("Two", "bob")).await.unwrap();

        let by_uploader = h
            .service
            .search(&SearchFilters {
                uploader: Some("BOB".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_uploader.len(), 1);
        assert_eq!(by_uploader[0].id, b.id);

        let by_id = h
            .service
            .search(&SearchFilters {
                keyword: Some(a.id.clone()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_id.len(), 1);
        assert_eq!(by_id[0].id, a.id);

        let all = h.service.list_documents().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, b.id);
    }

    #[tokio::test]
    async fn test_search_hides_documents_mid_ingestion() {
        let h = harness();
        let done = h.service.ingest(docx_upload("Finished", "alice")).await.unwrap();
        let pending = h.service.ingest(docx_upload("Pending", "alice")).await.unwrap();
        // Indexed but not yet flipped to complete
        h.db.set_status(&pending.id, DocumentStatus::Ingesting).unwrap();

        let hits = h
            .service
            .search(&SearchFilters {
                uploader: Some("alice".to_string()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, done.id);
    }

    #[test]
    fn test_describe_update() {
        let update = MetadataUpdate {
            title: Some("New".to_string()),
            tags: Some(vec!["a".to_string(), "b".to_string()]),
            folder_id: None,
        };
        assert_eq!(describe_update(&update), "title=New; tags=a,b");

        let update = MetadataUpdate {
            folder_id: Some(None),
            ..Default::default()
        };
        assert_eq!(describe_update(&update), "folder=none");
    }
}
