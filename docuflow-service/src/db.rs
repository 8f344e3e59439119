//! Database module for SQLite operations.
//!
//! This module provides the `Database` struct, the [`DocumentStore`] and
//! [`ActivityLog`] seams the pipeline depends on, and their SQLite
//! implementations organized into submodules by domain.

mod activity;
mod artifacts;
mod documents;
mod folders;
mod migrations;
pub mod models;
mod settings;

pub use folders::{FolderRemoval, FolderRename};
pub use models::{
    ActivityEvent, ActivityKind, Document, DocumentStatus, Folder, ImageInfo, MetadataUpdate,
};

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::StoreError;
use crate::ingestion::{ExtractedArtifact, TextBlock};

/// Authoritative storage for documents and their extracted artifacts.
///
/// Every call is atomic: it either applies completely or not at all.
pub trait DocumentStore: Send + Sync {
    /// Write a document, its tags, and its artifact together
    fn save(&self, doc: &Document, artifact: &ExtractedArtifact) -> Result<(), StoreError>;

    fn get(&self, document_id: &str) -> Result<Option<Document>, StoreError>;

    /// Full artifact including image bytes
    fn get_artifact(&self, document_id: &str) -> Result<Option<ExtractedArtifact>, StoreError>;

    fn text_blocks(&self, document_id: &str) -> Result<Vec<TextBlock>, StoreError>;

    fn list_images(&self, document_id: &str) -> Result<Vec<ImageInfo>, StoreError>;

    fn get_image(
        &self,
        document_id: &str,
        index: usize,
    ) -> Result<Option<(ImageInfo, Vec<u8>)>, StoreError>;

    /// Remove a document and everything it owns. Returns whether it existed.
    fn delete(&self, document_id: &str) -> Result<bool, StoreError>;

    /// Apply title/tag changes, returning the updated document
    fn update_metadata(
        &self,
        document_id: &str,
        update: &MetadataUpdate,
    ) -> Result<Option<Document>, StoreError>;

    fn set_status(&self, document_id: &str, status: DocumentStatus) -> Result<bool, StoreError>;

    /// Documents newest first, optionally limited to one status
    fn list(&self, status: Option<DocumentStatus>) -> Result<Vec<Document>, StoreError>;
}

/// Append-only record of pipeline and user actions
pub trait ActivityLog: Send + Sync {
    fn record(&self, event: &ActivityEvent) -> Result<(), StoreError>;

    /// Entries newest first, optionally for a single document
    fn entries(
        &self,
        document_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ActivityEvent>, StoreError>;
}

/// Database manager for SQLite operations
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database at the given path
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(StoreError::Io)?;
        }

        let conn = Connection::open(path).map_err(StoreError::Connection)?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(StoreError::Query)?;

        Self::from_connection(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(StoreError::Connection)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(StoreError::Query)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl DocumentStore for Database {
    fn save(&self, doc: &Document, artifact: &ExtractedArtifact) -> Result<(), StoreError> {
        self.insert_document(doc, artifact)
    }

    fn get(&self, document_id: &str) -> Result<Option<Document>, StoreError> {
        self.get_document(document_id)
    }

    fn get_artifact(&self, document_id: &str) -> Result<Option<ExtractedArtifact>, StoreError> {
        self.load_artifact(document_id)
    }

    fn text_blocks(&self, document_id: &str) -> Result<Vec<TextBlock>, StoreError> {
        self.get_text_blocks(document_id)
    }

    fn list_images(&self, document_id: &str) -> Result<Vec<ImageInfo>, StoreError> {
        self.get_image_infos(document_id)
    }

    fn get_image(
        &self,
        document_id: &str,
        index: usize,
    ) -> Result<Option<(ImageInfo, Vec<u8>)>, StoreError> {
        self.get_image_data(document_id, index)
    }

    fn delete(&self, document_id: &str) -> Result<bool, StoreError> {
        self.delete_document(document_id)
    }

    fn update_metadata(
        &self,
        document_id: &str,
        update: &MetadataUpdate,
    ) -> Result<Option<Document>, StoreError> {
        self.update_document_metadata(document_id, update)
    }

    fn set_status(&self, document_id: &str, status: DocumentStatus) -> Result<bool, StoreError> {
        self.set_document_status(document_id, status)
    }

    fn list(&self, status: Option<DocumentStatus>) -> Result<Vec<Document>, StoreError> {
        self.list_documents(status)
    }
}

impl ActivityLog for Database {
    fn record(&self, event: &ActivityEvent) -> Result<(), StoreError> {
        self.insert_activity(event)
    }

    fn entries(
        &self,
        document_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ActivityEvent>, StoreError> {
        self.list_activity(document_id, limit)
    }
}
