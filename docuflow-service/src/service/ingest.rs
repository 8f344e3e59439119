//! Ingestion state machine.
//!
//! `Received → Extracted → Persisted → Indexed → Complete`. A failure at any
//! step reports the last state reached and leaves no document behind.

use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::db::{ActivityEvent, ActivityKind, Document, DocumentStatus};
use crate::error::{ServiceError, ServiceResult, StoreError};
use crate::ingestion::hash::content_hash;
use crate::ingestion::{DocumentFormat, ExtractedArtifact, extract};
use crate::search::SearchEntry;
use crate::service::DocumentService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStage {
    Received,
    Extracted,
    Persisted,
    Indexed,
    Complete,
}

impl IngestionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionStage::Received => "received",
            IngestionStage::Extracted => "extracted",
            IngestionStage::Persisted => "persisted",
            IngestionStage::Indexed => "indexed",
            IngestionStage::Complete => "complete",
        }
    }
}

impl fmt::Display for IngestionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated, already-received upload
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub bytes: Bytes,
    pub filename: String,
    /// Declared format or MIME type; inferred from `filename` when absent
    pub format: Option<String>,
    pub title: Option<String>,
    pub tags: Vec<String>,
    pub uploaded_by: String,
    /// Existing folder to file the document in
    pub folder_id: Option<String>,
}

impl DocumentService {
    /// Run an upload through the ingestion pipeline.
    ///
    /// Returns the completed document, now searchable and eligible for
    /// transforms. On failure the error carries the last stage reached.
    pub async fn ingest(&self, upload: UploadRequest) -> ServiceResult<Document> {
        let size = upload.bytes.len() as u64;
        let max = self.runtime_config.dynamic().limits.max_document_size_bytes;
        if size > max {
            warn!(size, max, filename = %upload.filename, "Upload rejected: too large");
            return Err(ServiceError::PayloadTooLarge { size, max });
        }

        let doc_id = uuid::Uuid::new_v4().to_string();
        let actor = upload.uploaded_by.clone();
        info!(
            doc_id = %doc_id,
            filename = %upload.filename,
            size,
            stage = %IngestionStage::Received,
            "Upload received"
        );

        // Received → Extracted
        let format = match upload.format.as_deref().filter(|f| !f.trim().is_empty()) {
            Some(declared) => DocumentFormat::parse(declared),
            None => DocumentFormat::from_filename(&upload.filename),
        }
        .map_err(|e| self.fail(&doc_id, &actor, IngestionStage::Received, e))?;

        if let Some(folder_id) = &upload.folder_id {
            self.get_folder(folder_id)
                .map_err(|e| self.fail(&doc_id, &actor, IngestionStage::Received, e))?;
        }

        let bytes = upload.bytes.clone();
        let artifact = tokio::task::spawn_blocking(move || extract(&bytes, format))
            .await
            .map_err(|e| ServiceError::Internal {
                message: format!("Extraction task failed: {e}"),
            })
            .and_then(|r| r.map_err(ServiceError::from))
            .map_err(|e| self.fail(&doc_id, &actor, IngestionStage::Received, e))?;

        info!(
            doc_id = %doc_id,
            blocks = artifact.blocks.len(),
            images = artifact.images.len(),
            stage = %IngestionStage::Extracted,
            "Document extracted"
        );
        self.record(
            ActivityEvent::new(ActivityKind::Extracted, &doc_id, &actor).with_detail(format!(
                "{} text blocks, {} images",
                artifact.blocks.len(),
                artifact.images.len()
            )),
        );

        let guard = self.lock_document(&doc_id).await;
        let result = self
            .persist_and_index(&doc_id, upload, format, &artifact)
            .await;
        drop(guard);
        self.release_document_lock(&doc_id);

        result
    }

    /// Extracted → Persisted → Indexed → Complete, compensating on failure
    async fn persist_and_index(
        &self,
        doc_id: &str,
        upload: UploadRequest,
        format: DocumentFormat,
        artifact: &ExtractedArtifact,
    ) -> ServiceResult<Document> {
        let actor = upload.uploaded_by.as_str();

        let file_path = self
            .write_raw_file(doc_id, &upload.filename, &upload.bytes)
            .map_err(|e| self.fail(doc_id, actor, IngestionStage::Extracted, e))?;

        let now = Utc::now();
        let title = upload
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(&upload.filename)
            .to_string();
        let mut doc = Document {
            id: doc_id.to_string(),
            title,
            uploaded_by: upload.uploaded_by.clone(),
            format,
            filename: upload.filename.clone(),
            file_path: file_path.to_string_lossy().to_string(),
            file_hash: content_hash(&upload.bytes),
            file_size: upload.bytes.len() as u64,
            tags: normalize_tags(upload.tags),
            status: DocumentStatus::Ingesting,
            created_at: now,
            updated_at: now,
            folder_id: upload.folder_id.clone(),
        };

        // Extracted → Persisted
        if let Err(e) = self.store.save(&doc, artifact) {
            self.remove_raw_file(&doc.file_path);
            return Err(self.fail(doc_id, actor, IngestionStage::Extracted, e));
        }
        info!(doc_id = %doc_id, stage = %IngestionStage::Persisted, "Document persisted");
        self.record(ActivityEvent::new(ActivityKind::Persisted, doc_id, actor));

        // Persisted → Indexed
        if let Err(e) = self.index.upsert(SearchEntry::from(&doc)) {
            self.compensate(&doc, actor);
            return Err(self.fail(doc_id, actor, IngestionStage::Persisted, e));
        }
        info!(doc_id = %doc_id, stage = %IngestionStage::Indexed, "Document indexed");
        self.record(ActivityEvent::new(ActivityKind::Indexed, doc_id, actor));

        // Indexed → Complete
        let completed = match self.store.set_status(doc_id, DocumentStatus::Complete) {
            Ok(true) => Ok(()),
            Ok(false) => Err(ServiceError::DocumentNotFound {
                document_id: doc_id.to_string(),
            }),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = completed {
            if let Err(index_err) = self.index.remove(doc_id) {
                warn!(doc_id = %doc_id, error = %index_err, "Failed to remove search entry");
            }
            self.compensate(&doc, actor);
            return Err(self.fail(doc_id, actor, IngestionStage::Indexed, e));
        }

        doc.status = DocumentStatus::Complete;
        info!(
            doc_id = %doc_id,
            title = %doc.title,
            stage = %IngestionStage::Complete,
            "Ingestion complete"
        );
        self.record(ActivityEvent::new(ActivityKind::Completed, doc_id, actor));

        Ok(doc)
    }

    /// Undo a persisted document so nothing observable remains
    fn compensate(&self, doc: &Document, actor: &str) {
        warn!(doc_id = %doc.id, "Compensating: deleting persisted document");

        if let Err(e) = self.store.delete(&doc.id) {
            error!(doc_id = %doc.id, error = %e, "Compensating delete failed");
        }
        self.remove_raw_file(&doc.file_path);

        self.record(ActivityEvent::new(ActivityKind::Compensated, &doc.id, actor));
    }

    /// Log and record a failed ingestion, returning the classified error
    fn fail(
        &self,
        doc_id: &str,
        actor: &str,
        stopped_at: IngestionStage,
        cause: impl Into<ServiceError>,
    ) -> ServiceError {
        let err = ServiceError::ingestion(stopped_at, cause);
        error!(
            doc_id = %doc_id,
            stage = %stopped_at,
            code = err.error_code(),
            error = %err.root(),
            "Ingestion failed"
        );
        self.record(
            ActivityEvent::new(ActivityKind::Failed, doc_id, actor)
                .with_detail(format!("stopped at {stopped_at}: {}", err.root())),
        );
        err
    }

    /// Write the raw upload under `documents/{id}_{filename}`
    fn write_raw_file(
        &self,
        doc_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StoreError> {
        let docs_dir = self.runtime_config.static_config.storage.documents_dir();
        std::fs::create_dir_all(&docs_dir).map_err(StoreError::Io)?;

        let path = docs_dir.join(format!("{doc_id}_{}", sanitize_filename(filename)));

        let mut tmp = tempfile::NamedTempFile::new_in(&docs_dir).map_err(StoreError::Io)?;
        tmp.write_all(bytes).map_err(StoreError::Io)?;
        tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;

        Ok(path)
    }
}

/// Reduce a client-supplied filename to a safe single path component
pub(crate) fn sanitize_filename(filename: &str) -> String {
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    let sanitized: String = name
        .chars()
        .map(|c| match c {
            c if c.is_alphanumeric() => c,
            '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect();

    if sanitized.trim_matches('.').is_empty() {
        "upload".to_string()
    } else {
        sanitized
    }
}

/// Trim tags, drop empty ones, and de-duplicate case-insensitively keeping the first spelling
pub(crate) fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.to_lowercase()))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::db::{ActivityLog, DocumentStore, ImageInfo, MetadataUpdate};
    use crate::error::{ExtractionError, IndexError};
    use crate::ingestion::TextBlock;
    use crate::ingestion::pdf::tests::make_pdf;
    use crate::search::{MemorySearchIndex, SearchFilters, SearchIndex, TitleMatch};
    use crate::service::tests::{FailingIndex, docx_upload, harness, harness_with};

    fn pdf_upload(pages: &[Option<&str>]) -> UploadRequest {
        UploadRequest {
            bytes: Bytes::from(make_pdf(pages)),
            filename: "report.pdf".to_string(),
            format: Some("application/pdf".to_string()),
            title: Some("Quarterly Report".to_string()),
            tags: vec![" finance ".to_string(), "Finance".to_string(), "".to_string()],
            uploaded_by: "alice".to_string(),
            folder_id: None,
        }
    }

    fn stored_files(dir: &Path) -> usize {
        std::fs::read_dir(dir.join("documents"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_ingest_pdf_end_to_end() {
        let h = harness();
        let upload = pdf_upload(&[Some("Hello"), Some("world")]);
        let expected_hash = content_hash(&upload.bytes);
        let doc = h.service.ingest(upload).await.unwrap();

        assert_eq!(doc.status, DocumentStatus::Complete);
        assert_eq!(doc.title, "Quarterly Report");
        assert_eq!(doc.tags, vec!["finance"]);
        assert_eq!(doc.format, DocumentFormat::Pdf);

        let stored = h.db.get(&doc.id).unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Complete);
        assert_eq!(stored.file_hash, expected_hash);

        let blocks: Vec<String> = h
            .db
            .text_blocks(&doc.id)
            .unwrap()
            .into_iter()
            .map(|b| b.text)
            .collect();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].contains("Hello"));
        assert!(blocks[1].contains("world"));

        let hits = h
            .service
            .search(&SearchFilters {
                title: Some(TitleMatch::Contains("quarterly".to_string())),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, doc.id);

        assert!(Path::new(&stored.file_path).exists());

        let kinds: Vec<ActivityKind> = h
            .db
            .entries(Some(&doc.id), 10)
            .unwrap()
            .into_iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                ActivityKind::Completed,
                ActivityKind::Indexed,
                ActivityKind::Persisted,
                ActivityKind::Extracted,
            ]
        );
    }

    #[tokio::test]
    async fn test_title_defaults_to_filename() {
        let h = harness();
        let doc = h.service.ingest(docx_upload("Some notes", "bob")).await.unwrap();
        assert_eq!(doc.title, "notes.docx");
        assert_eq!(doc.uploaded_by, "bob");
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected_before_received() {
        let h = harness();
        let mut settings = std::collections::HashMap::new();
        settings.insert(
            "limits.max_document_size_bytes".to_string(),
            serde_json::json!(16),
        );
        h.service.update_settings(settings).unwrap();

        let err = h
            .service
            .ingest(pdf_upload(&[Some("Hello")]))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::PayloadTooLarge { max: 16, .. }));
        assert!(h.db.entries(None, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_format_stops_at_received() {
        let h = harness();
        let upload = UploadRequest {
            bytes: Bytes::from_static(b"plain text"),
            filename: "notes.txt".to_string(),
            format: None,
            title: None,
            tags: vec![],
            uploaded_by: "alice".to_string(),
            folder_id: None,
        };

        let err = h.service.ingest(upload).await.unwrap_err();

        assert!(matches!(
            err,
            ServiceError::Ingestion {
                stopped_at: IngestionStage::Received,
                ..
            }
        ));
        assert!(matches!(
            err.root(),
            ServiceError::Extraction(ExtractionError::UnsupportedFormat { .. })
        ));
        assert_eq!(stored_files(h.dir.path()), 0);
    }

    #[tokio::test]
    async fn test_empty_docx_stops_at_received() {
        let h = harness();
        let err = h.service.ingest(docx_upload("", "alice")).await.unwrap_err();

        assert!(matches!(
            err.root(),
            ServiceError::Extraction(ExtractionError::EmptyDocument)
        ));
        assert!(matches!(
            err,
            ServiceError::Ingestion {
                stopped_at: IngestionStage::Received,
                ..
            }
        ));
        assert!(h.db.list(None).unwrap().is_empty());

        let events = h.db.entries(None, 10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ActivityKind::Failed);
    }

    #[tokio::test]
    async fn test_corrupt_pdf_is_classified() {
        let h = harness();
        let upload = UploadRequest {
            bytes: Bytes::from_static(b"definitely not a pdf"),
            filename: "broken.pdf".to_string(),
            format: None,
            title: None,
            tags: vec![],
            uploaded_by: "alice".to_string(),
            folder_id: None,
        };

        let err = h.service.ingest(upload).await.unwrap_err();
        assert_eq!(err.error_code(), "corrupt_document");
    }

    #[tokio::test]
    async fn test_index_failure_rolls_back_persisted_document() {
        let h = harness_with(
            |db| db.clone() as Arc<dyn DocumentStore>,
            Arc::new(FailingIndex),
        );

        let err = h
            .service
            .ingest(pdf_upload(&[Some("Hello")]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ServiceError::Ingestion {
                stopped_at: IngestionStage::Persisted,
                ..
            }
        ));
        assert!(matches!(err.root(), ServiceError::Index(IndexError::Update { .. })));

        // Neither the document nor its artifact survived
        assert!(h.db.list(None).unwrap().is_empty());
        assert_eq!(stored_files(h.dir.path()), 0);

        let kinds: Vec<ActivityKind> = h
            .db
            .entries(None, 10)
            .unwrap()
            .into_iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(kinds[0], ActivityKind::Failed);
        assert_eq!(kinds[1], ActivityKind::Compensated);
    }

    /// Store that delegates to SQLite but refuses status changes
    struct StatusRejectingStore(Arc<crate::db::Database>);

    impl DocumentStore for StatusRejectingStore {
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
        fn delete(&self, id: &str) -> Result<bool, StoreError> {
            self.0.delete(id)
        }
        fn update_metadata(
            &self,
            id: &str,
            update: &MetadataUpdate,
        ) -> Result<Option<Document>, StoreError> {
            self.0.update_metadata(id, update)
        }
        fn set_status(&self, _id: &str, _status: DocumentStatus) -> Result<bool, StoreError> {
            Err(StoreError::LockPoisoned)
        }
        fn list(&self, status: Option<DocumentStatus>) -> Result<Vec<Document>, StoreError> {
            self.0.list(status)
        }
    }

    #[tokio::test]
    async fn test_status_failure_after_index_compensates_both() {
        let index = Arc::new(MemorySearchIndex::new());
        let h = harness_with(
            |db| Arc::new(StatusRejectingStore(db.clone())) as Arc<dyn DocumentStore>,
            index.clone(),
        );

        let err = h
            .service
            .ingest(pdf_upload(&[Some("Hello")]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ServiceError::Ingestion {
                stopped_at: IngestionStage::Indexed,
                ..
            }
        ));
        assert_eq!(index.len(), 0);
        assert!(h.db.list(None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_uploads_are_separate_documents() {
        let h = harness();
        let upload = docx_upload("Same body", "alice");
        let a = h.service.ingest(upload.clone()).await.unwrap();
        let b = h.service.ingest(upload).await.unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(a.file_hash, b.file_hash);
        assert_eq!(h.db.list(None).unwrap().len(), 2);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("report.pdf"), "report.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("my report (v2).docx"), "my_report__v2_.docx");
        assert_eq!(sanitize_filename(".."), "upload");
        assert_eq!(sanitize_filename(""), "upload");
    }

    #[test]
    fn test_normalize_tags() {
        let tags = vec![
            " alpha ".to_string(),
            "".to_string(),
            "Beta".to_string(),
            "ALPHA".to_string(),
            "   ".to_string(),
        ];
        assert_eq!(normalize_tags(tags), vec!["alpha", "Beta"]);
    }
}
