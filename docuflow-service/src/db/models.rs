//! Database model structs.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::ingestion::DocumentFormat;

/// Lifecycle status of a stored document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Persisted, not yet visible through search
    Ingesting,
    /// Indexed and eligible for transforms
    Complete,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Ingesting => "ingesting",
            DocumentStatus::Complete => "complete",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "complete" => DocumentStatus::Complete,
            _ => DocumentStatus::Ingesting,
        }
    }
}

/// Document record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub uploaded_by: String,
    pub format: DocumentFormat,
    /// Original upload filename
    pub filename: String,
    /// Path of the stored raw upload
    #[serde(skip_serializing)]
    pub file_path: String,
    pub file_hash: String,
    pub file_size: u64,
    pub tags: Vec<String>,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Folder the document is filed in, if any
    #[serde(default)]
    pub folder_id: Option<String>,
}

/// Column list matching [`Document::from_row`]
pub(crate) const DOCUMENT_COLUMNS: &str = "id, title, uploaded_by, format, filename, file_path, \
     file_hash, file_size, status, created_at, updated_at, folder_id";

impl Document {
    pub(crate) fn from_row(row: &Row<'_>, tags: Vec<String>) -> Result<Self, rusqlite::Error> {
        let format_str: String = row.get(3)?;
        let file_size: i64 = row.get(7)?;
        let status_str: String = row.get(8)?;
        let created_at_str: String = row.get(9)?;
        let updated_at_str: String = row.get(10)?;

        let format = format_str.parse::<DocumentFormat>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            uploaded_by: row.get(2)?,
            format,
            filename: row.get(4)?,
            file_path: row.get(5)?,
            file_hash: row.get(6)?,
            file_size: file_size as u64,
            tags,
            status: DocumentStatus::from_str(&status_str),
            created_at: parse_timestamp(&created_at_str),
            updated_at: parse_timestamp(&updated_at_str),
            folder_id: row.get(11)?,
        })
    }
}

/// Title, tag, and folder changes; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MetadataUpdate {
    pub title: Option<String>,
    pub tags: Option<Vec<String>>,
    /// `Some(None)` (JSON `null`) takes the document out of its folder
    #[serde(default, deserialize_with = "present")]
    pub folder_id: Option<Option<String>>,
}

impl MetadataUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.tags.is_none() && self.folder_id.is_none()
    }
}

/// Distinguishes an explicit `null` from an absent field
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// A named group of documents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub name: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    /// Complete documents filed here
    pub document_count: usize,
}

/// Column list matching [`Folder::from_row`]; expects `folders` aliased as `f`
pub(crate) const FOLDER_COLUMNS: &str = "f.id, f.name, f.created_by, f.created_at, \
     (SELECT COUNT(*) FROM documents d WHERE d.folder_id = f.id AND d.status = 'complete')";

impl Folder {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let created_at_str: String = row.get(3)?;
        let document_count: i64 = row.get(4)?;

        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            created_by: row.get(2)?,
            created_at: parse_timestamp(&created_at_str),
            document_count: document_count as usize,
        })
    }
}

/// Stored image, without its bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub index: usize,
    pub position: u32,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    pub size_bytes: usize,
}

impl ImageInfo {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let index: i64 = row.get(0)?;
        let position: i64 = row.get(1)?;
        let width: Option<i64> = row.get(3)?;
        let height: Option<i64> = row.get(4)?;
        let size_bytes: i64 = row.get(5)?;

        Ok(Self {
            index: index as usize,
            position: position as u32,
            mime_type: row.get(2)?,
            width: width.map(|w| w as u32),
            height: height.map(|h| h as u32),
            size_bytes: size_bytes as usize,
        })
    }
}

/// Kinds of events recorded in the activity log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Extracted,
    Persisted,
    Indexed,
    Completed,
    Failed,
    Compensated,
    TransformInvoked,
    MetadataUpdated,
    Deleted,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Extracted => "extracted",
            ActivityKind::Persisted => "persisted",
            ActivityKind::Indexed => "indexed",
            ActivityKind::Completed => "completed",
            ActivityKind::Failed => "failed",
            ActivityKind::Compensated => "compensated",
            ActivityKind::TransformInvoked => "transform_invoked",
            ActivityKind::MetadataUpdated => "metadata_updated",
            ActivityKind::Deleted => "deleted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "extracted" => ActivityKind::Extracted,
            "persisted" => ActivityKind::Persisted,
            "indexed" => ActivityKind::Indexed,
            "completed" => ActivityKind::Completed,
            "failed" => ActivityKind::Failed,
            "compensated" => ActivityKind::Compensated,
            "transform_invoked" => ActivityKind::TransformInvoked,
            "metadata_updated" => ActivityKind::MetadataUpdated,
            "deleted" => ActivityKind::Deleted,
            _ => return None,
        })
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One activity log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub kind: ActivityKind,
    pub document_id: String,
    pub actor_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ActivityEvent {
    pub fn new(kind: ActivityKind, document_id: &str, actor_id: &str) -> Self {
        Self {
            kind,
            document_id: document_id.to_string(),
            actor_id: actor_id.to_string(),
            timestamp: Utc::now(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let kind_str: String = row.get(0)?;
        let timestamp_str: String = row.get(3)?;

        let kind = ActivityKind::from_str(&kind_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("unknown activity kind: {kind_str}").into(),
            )
        })?;

        Ok(Self {
            kind,
            document_id: row.get(1)?,
            actor_id: row.get(2)?,
            timestamp: parse_timestamp(&timestamp_str),
            detail: row.get(4)?,
        })
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_kind_round_trips_through_storage_names() {
        for kind in [
            ActivityKind::Extracted,
            ActivityKind::Compensated,
            ActivityKind::TransformInvoked,
            ActivityKind::MetadataUpdated,
        ] {
            assert_eq!(ActivityKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(ActivityKind::from_str("bogus"), None);
    }

    #[test]
    fn test_unknown_status_reads_as_ingesting() {
        assert_eq!(DocumentStatus::from_str("complete"), DocumentStatus::Complete);
        assert_eq!(DocumentStatus::from_str("weird"), DocumentStatus::Ingesting);
    }

    #[test]
    fn test_document_json_hides_file_path() {
        let now = Utc::now();
        let doc = Document {
            id: "d1".to_string(),
            title: "T".to_string(),
            uploaded_by: "u".to_string(),
            format: DocumentFormat::Pdf,
            filename: "t.pdf".to_string(),
            file_path: "/data/documents/d1_t.pdf".to_string(),
            file_hash: "abc".to_string(),
            file_size: 3,
            tags: vec![],
            status: DocumentStatus::Complete,
            created_at: now,
            updated_at: now,
            folder_id: None,
        };
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json.get("file_path").is_none());
        assert_eq!(json["format"], "pdf");
        assert_eq!(json["status"], "complete");
        assert!(json["folder_id"].is_null());
    }

    #[test]
    fn test_metadata_update_distinguishes_null_folder() {
        let absent: MetadataUpdate = serde_json::from_str(r#"{"title":"T"}"#).unwrap();
        assert_eq!(absent.folder_id, None);

        let cleared: MetadataUpdate = serde_json::from_str(r#"{"folder_id":null}"#).unwrap();
        assert_eq!(cleared.folder_id, Some(None));
        assert!(!cleared.is_empty());

        let moved: MetadataUpdate = serde_json::from_str(r#"{"folder_id":"f1"}"#).unwrap();
        assert_eq!(moved.folder_id, Some(Some("f1".to_string())));
    }
}
