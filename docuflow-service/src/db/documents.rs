//! Document CRUD operations.

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::Database;
use super::artifacts::insert_artifact;
use super::models::{DOCUMENT_COLUMNS, Document, DocumentStatus, MetadataUpdate};
use crate::error::StoreError;
use crate::ingestion::ExtractedArtifact;

pub(super) fn timestamp(dt: &chrono::DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Database {
    /// Insert a document with its tags and artifact in one transaction
    pub fn insert_document(
        &self,
        doc: &Document,
        artifact: &ExtractedArtifact,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(StoreError::Query)?;

        tx.execute(
            r#"
            INSERT INTO documents (id, title, uploaded_by, format, filename, file_path, file_hash, file_size, status, created_at, updated_at, folder_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                doc.id,
                doc.title,
                doc.uploaded_by,
                doc.format.as_str(),
                doc.filename,
                doc.file_path,
                doc.file_hash,
                doc.file_size as i64,
                doc.status.as_str(),
                timestamp(&doc.created_at),
                timestamp(&doc.updated_at),
                doc.folder_id,
            ],
        )
        .map_err(StoreError::Query)?;

        replace_tags(&tx, &doc.id, &doc.tags)?;
        insert_artifact(&tx, &doc.id, artifact)?;

        tx.commit().map_err(StoreError::Query)
    }

    /// Get a document by ID
    pub fn get_document(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let conn = self.conn()?;
        load_document(&conn, id)
    }

    /// Delete a document; artifacts and tags cascade
    pub fn delete_document(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;

        let rows = conn
            .execute("DELETE FROM documents WHERE id = ?1", params![id])
            .map_err(StoreError::Query)?;

        Ok(rows > 0)
    }

    pub fn update_document_metadata(
        &self,
        id: &str,
        update: &MetadataUpdate,
    ) -> Result<Option<Document>, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(StoreError::Query)?;

        let now = timestamp(&Utc::now());
        let rows = match &update.title {
            Some(title) => tx.execute(
                "UPDATE documents SET title = ?1, updated_at = ?2 WHERE id = ?3",
                params![title, now, id],
            ),
            None => tx.execute(
                "UPDATE documents SET updated_at = ?1 WHERE id = ?2",
                params![now, id],
            ),
        }
        .map_err(StoreError::Query)?;

        if rows == 0 {
            return Ok(None);
        }

        if let Some(tags) = &update.tags {
            replace_tags(&tx, id, tags)?;
        }

        if let Some(folder_id) = &update.folder_id {
            tx.execute(
                "UPDATE documents SET folder_id = ?1 WHERE id = ?2",
                params![folder_id, id],
            )
            .map_err(StoreError::Query)?;
        }

        let doc = load_document(&tx, id)?;
        tx.commit().map_err(StoreError::Query)?;
        Ok(doc)
    }

    pub fn set_document_status(&self, id: &str, status: DocumentStatus) -> Result<bool, StoreError> {
        let conn = self.conn()?;

        let rows = conn
            .execute(
                "UPDATE documents SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), timestamp(&Utc::now()), id],
            )
            .map_err(StoreError::Query)?;

        Ok(rows > 0)
    }

    /// List documents newest first, optionally filtered by status
    pub fn list_documents(&self, status: Option<DocumentStatus>) -> Result<Vec<Document>, StoreError> {
        let conn = self.conn()?;

        let sql = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents \
             WHERE (?1 IS NULL OR status = ?1) ORDER BY created_at DESC, id ASC"
        );
        let mut stmt = conn.prepare(&sql).map_err(StoreError::Query)?;
        let rows = stmt
            .query_map(params![status.map(|s| s.as_str())], |row| {
                Document::from_row(row, vec![])
            })
            .map_err(StoreError::Query)?;

        let mut docs = Vec::new();
        for row in rows {
            let mut doc = row.map_err(StoreError::Query)?;
            doc.tags = load_tags(&conn, &doc.id)?;
            docs.push(doc);
        }

        Ok(docs)
    }
}

fn load_document(conn: &Connection, id: &str) -> Result<Option<Document>, StoreError> {
    let doc = conn
        .query_row(
            &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"),
            params![id],
            |row| Document::from_row(row, vec![]),
        )
        .optional()
        .map_err(StoreError::Query)?;

    match doc {
        Some(mut doc) => {
            doc.tags = load_tags(conn, id)?;
            Ok(Some(doc))
        }
        None => Ok(None),
    }
}

fn load_tags(conn: &Connection, id: &str) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn
        .prepare("SELECT tag FROM document_tags WHERE document_id = ?1 ORDER BY rowid")
        .map_err(StoreError::Query)?;
    let tags = stmt
        .query_map(params![id], |row| row.get(0))
        .map_err(StoreError::Query)?
        .collect::<Result<Vec<String>, _>>()
        .map_err(StoreError::Query)?;
    Ok(tags)
}

fn replace_tags(conn: &Connection, id: &str, tags: &[String]) -> Result<(), StoreError> {
    conn.execute("DELETE FROM document_tags WHERE document_id = ?1", params![id])
        .map_err(StoreError::Query)?;

    for tag in tags {
        conn.execute(
            "INSERT OR IGNORE INTO document_tags (document_id, tag) VALUES (?1, ?2)",
            params![id, tag],
        )
        .map_err(StoreError::Query)?;
    }

    Ok(())
}
