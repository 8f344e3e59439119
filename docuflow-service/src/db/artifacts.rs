//! Extracted artifact storage: text blocks and images.

use rusqlite::{Connection, OptionalExtension, params};

use super::Database;
use super::models::ImageInfo;
use crate::error::StoreError;
use crate::ingestion::{ExtractedArtifact, ExtractedImage, TextBlock};

pub(super) fn insert_artifact(
    conn: &Connection,
    document_id: &str,
    artifact: &ExtractedArtifact,
) -> Result<(), StoreError> {
    let mut block_stmt = conn
        .prepare(
            "INSERT INTO text_blocks (document_id, block_index, position, text) VALUES (?1, ?2, ?3, ?4)",
        )
        .map_err(StoreError::Query)?;
    for (index, block) in artifact.blocks.iter().enumerate() {
        block_stmt
            .execute(params![document_id, index as i64, block.position as i64, block.text])
            .map_err(StoreError::Query)?;
    }

    let mut image_stmt = conn
        .prepare(
            "INSERT INTO document_images (document_id, image_index, position, mime_type, width, height, data) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .map_err(StoreError::Query)?;
    for (index, image) in artifact.images.iter().enumerate() {
        image_stmt
            .execute(params![
                document_id,
                index as i64,
                image.position as i64,
                image.mime_type,
                image.width.map(|w| w as i64),
                image.height.map(|h| h as i64),
                image.data,
            ])
            .map_err(StoreError::Query)?;
    }

    Ok(())
}

impl Database {
    /// Canonical text blocks in extraction order
    pub fn get_text_blocks(&self, document_id: &str) -> Result<Vec<TextBlock>, StoreError> {
        let conn = self.conn()?;
        load_blocks(&conn, document_id)
    }

    pub fn get_image_infos(&self, document_id: &str) -> Result<Vec<ImageInfo>, StoreError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                "SELECT image_index, position, mime_type, width, height, length(data) \
                 FROM document_images WHERE document_id = ?1 ORDER BY image_index",
            )
            .map_err(StoreError::Query)?;

        stmt.query_map(params![document_id], ImageInfo::from_row)
            .map_err(StoreError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::Query)
    }

    pub fn get_image_data(
        &self,
        document_id: &str,
        index: usize,
    ) -> Result<Option<(ImageInfo, Vec<u8>)>, StoreError> {
        let conn = self.conn()?;

        conn.query_row(
            "SELECT image_index, position, mime_type, width, height, length(data), data \
             FROM document_images WHERE document_id = ?1 AND image_index = ?2",
            params![document_id, index as i64],
            |row| Ok((ImageInfo::from_row(row)?, row.get::<_, Vec<u8>>(6)?)),
        )
        .optional()
        .map_err(StoreError::Query)
    }

    /// The whole artifact, or `None` if the document does not exist
    pub fn load_artifact(&self, document_id: &str) -> Result<Option<ExtractedArtifact>, StoreError> {
        let conn = self.conn()?;

        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM documents WHERE id = ?1)",
                params![document_id],
                |row| row.get(0),
            )
            .map_err(StoreError::Query)?;
        if !exists {
            return Ok(None);
        }

        let blocks = load_blocks(&conn, document_id)?;

        let mut stmt = conn
            .prepare(
                "SELECT position, mime_type, width, height, data \
                 FROM document_images WHERE document_id = ?1 ORDER BY image_index",
            )
            .map_err(StoreError::Query)?;
        let images = stmt
            .query_map(params![document_id], |row| {
                let position: i64 = row.get(0)?;
                let width: Option<i64> = row.get(2)?;
                let height: Option<i64> = row.get(3)?;
                Ok(ExtractedImage {
                    position: position as u32,
                    mime_type: row.get(1)?,
                    data: row.get(4)?,
                    width: width.map(|w| w as u32),
                    height: height.map(|h| h as u32),
                })
            })
            .map_err(StoreError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::Query)?;

        Ok(Some(ExtractedArtifact { blocks, images }))
    }
}

fn load_blocks(conn: &Connection, document_id: &str) -> Result<Vec<TextBlock>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT position, text FROM text_blocks WHERE document_id = ?1 ORDER BY block_index",
        )
        .map_err(StoreError::Query)?;

    stmt.query_map(params![document_id], |row| {
        let position: i64 = row.get(0)?;
        Ok(TextBlock {
            position: position as u32,
            text: row.get(1)?,
        })
    })
    .map_err(StoreError::Query)?
    .collect::<Result<Vec<_>, _>>()
    .map_err(StoreError::Query)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::db::tests::{sample_artifact, sample_document};

    fn seeded() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.insert_document(&sample_document("d1", Utc::now()), &sample_artifact())
            .unwrap();
        db
    }

    #[test]
    fn test_blocks_keep_extraction_order() {
        let db = seeded();
        let blocks = db.get_text_blocks("d1").unwrap();
        assert_eq!(blocks, sample_artifact().blocks);
    }

    #[test]
    fn test_image_info_reports_size_without_bytes() {
        let db = seeded();
        let infos = db.get_image_infos("d1").unwrap();
        assert_eq!(
            infos,
            vec![ImageInfo {
                index: 0,
                position: 2,
                mime_type: "image/png".to_string(),
                width: Some(2),
                height: Some(1),
                size_bytes: 4,
            }]
        );
    }

    #[test]
    fn test_get_image_data_by_index() {
        let db = seeded();
        let (info, data) = db.get_image_data("d1", 0).unwrap().unwrap();
        assert_eq!(info.mime_type, "image/png");
        assert_eq!(data, vec![1, 2, 3, 4]);
        assert!(db.get_image_data("d1", 1).unwrap().is_none());
    }

    #[test]
    fn test_load_artifact_for_missing_document() {
        let db = seeded();
        assert!(db.load_artifact("ghost").unwrap().is_none());
    }

    #[test]
    fn test_document_without_images_has_empty_image_list() {
        let db = Database::open_in_memory().unwrap();
        let artifact = ExtractedArtifact {
            blocks: vec![TextBlock {
                position: 1,
                text: "only text".to_string(),
            }],
            images: vec![],
        };
        db.insert_document(&sample_document("d2", Utc::now()), &artifact)
            .unwrap();

        let loaded = db.load_artifact("d2").unwrap().unwrap();
        assert_eq!(loaded, artifact);
    }
}
