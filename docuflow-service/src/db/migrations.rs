//! Database schema migrations.

use rusqlite::Connection;

use crate::error::StoreError;

/// Bring the schema up to date. Safe to run on every startup.
pub(super) fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            uploaded_by TEXT NOT NULL,
            format TEXT NOT NULL,
            filename TEXT NOT NULL,
            file_path TEXT NOT NULL,
            file_hash TEXT NOT NULL,
            file_size INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'ingesting',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);
        CREATE INDEX IF NOT EXISTS idx_documents_hash ON documents(file_hash);

        CREATE TABLE IF NOT EXISTS document_tags (
            document_id TEXT NOT NULL,
            tag TEXT NOT NULL,
            PRIMARY KEY (document_id, tag),
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_document_tags_tag ON document_tags(tag);

        -- Canonical text, in extraction order
        CREATE TABLE IF NOT EXISTS text_blocks (
            document_id TEXT NOT NULL,
            block_index INTEGER NOT NULL,
            position INTEGER NOT NULL,
            text TEXT NOT NULL,
            PRIMARY KEY (document_id, block_index),
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS document_images (
            document_id TEXT NOT NULL,
            image_index INTEGER NOT NULL,
            position INTEGER NOT NULL,
            mime_type TEXT NOT NULL,
            width INTEGER,
            height INTEGER,
            data BLOB NOT NULL,
            PRIMARY KEY (document_id, image_index),
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        );

        -- No foreign key: entries outlive deleted documents
        CREATE TABLE IF NOT EXISTS activity_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            document_id TEXT NOT NULL,
            actor_id TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            detail TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_activity_document ON activity_log(document_id);

        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS folders (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE COLLATE NOCASE,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
    "#,
    )
    .map_err(|e| StoreError::Migration {
        message: e.to_string(),
    })?;

    run_document_folder_migration(conn)?;

    Ok(())
}

/// Migration: file documents into folders
fn run_document_folder_migration(conn: &Connection) -> Result<(), StoreError> {
    let has_folder_id: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM pragma_table_info('documents') WHERE name='folder_id'",
            [],
            |row| row.get::<_, i64>(0),
        )
        .unwrap_or(0)
        > 0;

    if !has_folder_id {
        conn.execute_batch("ALTER TABLE documents ADD COLUMN folder_id TEXT REFERENCES folders(id);")
            .map_err(|e| StoreError::Migration {
                message: format!("Failed to add folder column: {e}"),
            })?;
    }

    conn.execute_batch("CREATE INDEX IF NOT EXISTS idx_documents_folder ON documents(folder_id);")
        .map_err(|e| StoreError::Migration {
            message: e.to_string(),
        })
}
