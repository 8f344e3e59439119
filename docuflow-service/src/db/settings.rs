//! Settings storage operations.
//!
//! Overrides for the hot-reloadable configuration, stored as JSON values.

use std::collections::HashMap;

use rusqlite::params;

use super::Database;
use crate::error::StoreError;

impl Database {
    /// Get all settings as a map
    pub fn get_all_settings(&self) -> Result<HashMap<String, serde_json::Value>, StoreError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT key, value FROM settings")
            .map_err(StoreError::Query)?;

        let rows = stmt
            .query_map([], |row| {
                let key: String = row.get(0)?;
                let value_str: String = row.get(1)?;
                Ok((key, value_str))
            })
            .map_err(StoreError::Query)?;

        let mut settings = HashMap::new();
        for row in rows {
            let (key, value_str) = row.map_err(StoreError::Query)?;
            if let Ok(value) = serde_json::from_str(&value_str) {
                settings.insert(key, value);
            }
        }

        Ok(settings)
    }

    /// Set multiple settings in a single transaction.
    /// Null values delete the setting (revert to default).
    pub fn set_settings(
        &self,
        settings: &HashMap<String, serde_json::Value>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(StoreError::Query)?;

        for (key, value) in settings {
            if value.is_null() {
                tx.execute("DELETE FROM settings WHERE key = ?1", params![key])
                    .map_err(StoreError::Query)?;
            } else {
                let value_str = serde_json::to_string(value).map_err(StoreError::Serialization)?;
                tx.execute(
                    "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, datetime('now')) \
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                    params![key, value_str],
                )
                .map_err(StoreError::Query)?;
            }
        }

        tx.commit().map_err(StoreError::Query)
    }
}
