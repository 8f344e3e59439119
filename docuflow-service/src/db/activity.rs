//! Activity log storage.

use rusqlite::params;

use super::Database;
use super::documents::timestamp;
use super::models::ActivityEvent;
use crate::error::StoreError;

impl Database {
    pub fn insert_activity(&self, event: &ActivityEvent) -> Result<(), StoreError> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO activity_log (kind, document_id, actor_id, timestamp, detail) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.kind.as_str(),
                event.document_id,
                event.actor_id,
                timestamp(&event.timestamp),
                event.detail,
            ],
        )
        .map_err(StoreError::Query)?;

        Ok(())
    }

    /// Newest entries first
    pub fn list_activity(
        &self,
        document_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ActivityEvent>, StoreError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                "SELECT kind, document_id, actor_id, timestamp, detail FROM activity_log \
                 WHERE (?1 IS NULL OR document_id = ?1) ORDER BY id DESC LIMIT ?2",
            )
            .map_err(StoreError::Query)?;

        stmt.query_map(params![document_id, limit as i64], ActivityEvent::from_row)
            .map_err(StoreError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::Query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ActivityKind;

    #[test]
    fn test_record_and_list_newest_first() {
        let db = Database::open_in_memory().unwrap();
        db.insert_activity(&ActivityEvent::new(ActivityKind::Extracted, "d1", "alice"))
            .unwrap();
        db.insert_activity(
            &ActivityEvent::new(ActivityKind::Persisted, "d1", "alice").with_detail("2 blocks"),
        )
        .unwrap();
        db.insert_activity(&ActivityEvent::new(ActivityKind::Deleted, "d2", "bob"))
            .unwrap();

        let all = db.list_activity(None, 100).unwrap();
        let kinds: Vec<ActivityKind> = all.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![ActivityKind::Deleted, ActivityKind::Persisted, ActivityKind::Extracted]
        );

        let d1 = db.list_activity(Some("d1"), 100).unwrap();
        assert_eq!(d1.len(), 2);
        assert_eq!(d1[0].detail.as_deref(), Some("2 blocks"));
        assert_eq!(d1[1].actor_id, "alice");
    }

    #[test]
    fn test_list_respects_limit() {
        let db = Database::open_in_memory().unwrap();
        for _ in 0..5 {
            db.insert_activity(&ActivityEvent::new(ActivityKind::TransformInvoked, "d1", "u"))
                .unwrap();
        }
        assert_eq!(db.list_activity(Some("d1"), 3).unwrap().len(), 3);
    }
}
