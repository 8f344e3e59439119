//! Folder CRUD operations.

use rusqlite::{Connection, OptionalExtension, params};

use super::Database;
use super::documents::timestamp;
use super::models::{FOLDER_COLUMNS, Folder};
use crate::error::StoreError;

/// Outcome of renaming a folder
#[derive(Debug, PartialEq, Eq)]
pub enum FolderRename {
    Renamed(Folder),
    NotFound,
    /// Another folder already uses the name, ignoring case
    NameTaken,
}

/// Outcome of deleting a folder
#[derive(Debug, PartialEq, Eq)]
pub enum FolderRemoval {
    Deleted,
    NotFound,
    /// Documents in any status still reference the folder
    NotEmpty { documents: usize },
}

impl Database {
    /// Insert a folder. Returns false when its name is already taken.
    pub fn insert_folder(&self, folder: &Folder) -> Result<bool, StoreError> {
        let conn = self.conn()?;

        let rows = conn
            .execute(
                "INSERT OR IGNORE INTO folders (id, name, created_by, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    folder.id,
                    folder.name,
                    folder.created_by,
                    timestamp(&folder.created_at)
                ],
            )
            .map_err(StoreError::Query)?;

        Ok(rows > 0)
    }

    pub fn get_folder(&self, id: &str) -> Result<Option<Folder>, StoreError> {
        let conn = self.conn()?;
        load_folder(&conn, id)
    }

    /// All folders ordered by name
    pub fn list_folders(&self) -> Result<Vec<Folder>, StoreError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {FOLDER_COLUMNS} FROM folders f ORDER BY f.name COLLATE NOCASE, f.id"
            ))
            .map_err(StoreError::Query)?;
        let folders = stmt
            .query_map([], Folder::from_row)
            .map_err(StoreError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::Query)?;

        Ok(folders)
    }

    pub fn rename_folder(&self, id: &str, name: &str) -> Result<FolderRename, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(StoreError::Query)?;

        if load_folder(&tx, id)?.is_none() {
            return Ok(FolderRename::NotFound);
        }

        let taken: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM folders WHERE name = ?1 AND id != ?2)",
                params![name, id],
                |row| row.get(0),
            )
            .map_err(StoreError::Query)?;
        if taken {
            return Ok(FolderRename::NameTaken);
        }

        tx.execute(
            "UPDATE folders SET name = ?1 WHERE id = ?2",
            params![name, id],
        )
        .map_err(StoreError::Query)?;

        let folder = load_folder(&tx, id)?;
        tx.commit().map_err(StoreError::Query)?;

        Ok(folder.map_or(FolderRename::NotFound, FolderRename::Renamed))
    }

    /// Delete an empty folder
    pub fn delete_folder(&self, id: &str) -> Result<FolderRemoval, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(StoreError::Query)?;

        let documents: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM documents WHERE folder_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .map_err(StoreError::Query)?;
        if documents > 0 {
            return Ok(FolderRemoval::NotEmpty {
                documents: documents as usize,
            });
        }

        let rows = tx
            .execute("DELETE FROM folders WHERE id = ?1", params![id])
            .map_err(StoreError::Query)?;
        tx.commit().map_err(StoreError::Query)?;

        Ok(if rows > 0 {
            FolderRemoval::Deleted
        } else {
            FolderRemoval::NotFound
        })
    }
}

fn load_folder(conn: &Connection, id: &str) -> Result<Option<Folder>, StoreError> {
    conn.query_row(
        &format!("SELECT {FOLDER_COLUMNS} FROM folders f WHERE f.id = ?1"),
        params![id],
        Folder::from_row,
    )
    .optional()
    .map_err(StoreError::Query)
}
