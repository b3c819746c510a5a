use super::models::{Activity, MediaItem};
use super::sqlite::Database;
use crate::sink::{MediaId, NormalizedRecord, RecordId, RecordSink, SinkError};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Result};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// SQLite destination for activities and their media.
pub struct ActivityStore {
    db: Mutex<Database>,
}

impl ActivityStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            db: Mutex::new(Database::open(path)?),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            db: Mutex::new(Database::open_in_memory()?),
        })
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register_media(
        &self,
        source_url: &str,
        local_path: &Path,
        content_type: Option<&str>,
        byte_size: u64,
    ) -> Result<MediaId> {
        let db = self.db();
        let now = Utc::now().to_rfc3339();
        db.connection().execute(
            "INSERT INTO media (source_url, local_path, content_type, byte_size, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                source_url,
                local_path.to_string_lossy(),
                content_type,
                byte_size as i64,
                now
            ],
        )?;
        Ok(MediaId(db.connection().last_insert_rowid()))
    }

    pub fn get_media(&self, id: MediaId) -> Result<Option<MediaItem>> {
        self.db()
            .connection()
            .query_row(
                "SELECT id, source_url, local_path, content_type, byte_size, created_at \
                 FROM media WHERE id = ?1",
                params![id.0],
                |row| {
                    Ok(MediaItem {
                        id: row.get(0)?,
                        source_url: row.get(1)?,
                        local_path: row.get(2)?,
                        content_type: row.get(3)?,
                        byte_size: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                },
            )
            .optional()
    }

    /// Delete a media row no activity refers to. Returns its local path.
    pub fn remove_media(&self, id: MediaId) -> Result<Option<String>> {
        let db = self.db();
        let local_path: Option<String> = db
            .connection()
            .query_row(
                "SELECT local_path FROM media WHERE id = ?1 \
                 AND NOT EXISTS (SELECT 1 FROM activity_media WHERE media_id = ?1)",
                params![id.0],
                |row| row.get(0),
            )
            .optional()?;
        if local_path.is_some() {
            db.connection()
                .execute("DELETE FROM media WHERE id = ?1", params![id.0])?;
        }
        Ok(local_path)
    }

    pub fn count_activities(&self) -> Result<i64> {
        self.db()
            .connection()
            .query_row("SELECT COUNT(*) FROM activity", [], |row| row.get(0))
    }

    /// Newest first by insertion order.
    pub fn recent_activities(&self, limit: i64) -> Result<Vec<Activity>> {
        let db = self.db();
        let mut stmt = db.connection().prepare(
            "SELECT id, origin, content, recorded_at, source_ref, fingerprint, created_at \
             FROM activity ORDER BY id DESC LIMIT ?1",
        )?;
        let mut activities = stmt
            .query_map(params![limit], |row| {
                Ok(Activity {
                    id: row.get(0)?,
                    origin: row.get(1)?,
                    content: row.get(2)?,
                    recorded_at: row.get(3)?,
                    source_ref: row.get(4)?,
                    fingerprint: row.get(5)?,
                    created_at: row.get(6)?,
                    media_ids: Vec::new(),
                })
            })?
            .collect::<Result<Vec<_>>>()?;

        let mut media_stmt = db.connection().prepare_cached(
            "SELECT media_id FROM activity_media WHERE activity_id = ?1 ORDER BY position",
        )?;
        for activity in activities.iter_mut() {
            activity.media_ids = media_stmt
                .query_map(params![activity.id], |row| row.get(0))?
                .collect::<Result<Vec<i64>>>()?;
        }
        Ok(activities)
    }

    fn insert_activity(&self, record: &NormalizedRecord) -> Result<RecordId> {
        let db = self.db();
        let tx = db.connection().unchecked_transaction()?;
        let now = Utc::now();
        let recorded_at = record.recorded_at.unwrap_or(now).to_rfc3339();
        tx.execute(
            "INSERT INTO activity \
             (origin, content, recorded_at, source_ref, fingerprint, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.origin.as_str(),
                record.content,
                recorded_at,
                record.source_ref,
                record.fingerprint,
                now.to_rfc3339()
            ],
        )?;
        let activity_id = tx.last_insert_rowid();
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO activity_media (activity_id, media_id, position) \
                 VALUES (?1, ?2, ?3)",
            )?;
            for (position, media) in record.media.iter().enumerate() {
                stmt.execute(params![activity_id, media.0, position as i64])?;
            }
        }
        tx.commit()?;
        debug!(
            "Inserted activity {} with {} media",
            activity_id,
            record.media.len()
        );
        Ok(RecordId(activity_id))
    }
}

impl RecordSink for ActivityStore {
    fn submit(&self, record: &NormalizedRecord) -> Result<RecordId, SinkError> {
        if record.content.trim().is_empty() && record.media.is_empty() {
            return Err(SinkError::Rejected(
                "record has neither content nor media".to_string(),
            ));
        }
        match self.insert_activity(record) {
            Ok(id) => {
                info!(activity_id = id.0, origin = record.origin.as_str(), "Activity created");
                Ok(id)
            }
            Err(rusqlite::Error::SqliteFailure(err, msg))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(SinkError::Rejected(
                    msg.unwrap_or_else(|| "constraint violation".to_string()),
                ))
            }
            Err(e) => Err(SinkError::Unavailable(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordOrigin;
    use chrono::TimeZone;

    fn record(content: &str, media: Vec<MediaId>) -> NormalizedRecord {
        NormalizedRecord {
            origin: RecordOrigin::CsvImport,
            fingerprint: "fp".to_string(),
            raw_fields: vec![content.to_string()],
            content: content.to_string(),
            media_urls: Vec::new(),
            media,
            recorded_at: Some(Utc.with_ymd_and_hms(2020, 5, 1, 4, 0, 0).unwrap()),
            source_ref: Some("https://example.com/p/1".to_string()),
        }
    }

    #[test]
    fn test_submit_stores_activity_with_media_order() {
        let store = ActivityStore::open_in_memory().unwrap();
        let m1 = store
            .register_media("https://img/a.jpg", Path::new("/m/a.jpg"), Some("image/jpeg"), 10)
            .unwrap();
        let m2 = store
            .register_media("https://img/b.png", Path::new("/m/b.png"), None, 20)
            .unwrap();

        let id = store.submit(&record("hello", vec![m2, m1])).unwrap();
        let stored = store.recent_activities(10).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, id.0);
        assert_eq!(stored[0].origin, "csv_import");
        assert_eq!(stored[0].recorded_at, "2020-05-01T04:00:00+00:00");
        assert_eq!(stored[0].media_ids, vec![m2.0, m1.0]);
    }

    #[test]
    fn test_empty_record_is_rejected() {
        let store = ActivityStore::open_in_memory().unwrap();
        let err = store.submit(&record("   ", Vec::new())).unwrap_err();
        assert!(matches!(err, SinkError::Rejected(_)));
        assert_eq!(store.count_activities().unwrap(), 0);
    }

    #[test]
    fn test_remove_media_keeps_linked_rows() {
        let store = ActivityStore::open_in_memory().unwrap();
        let linked = store
            .register_media("https://img/a.jpg", Path::new("/m/a.jpg"), None, 1)
            .unwrap();
        let loose = store
            .register_media("https://img/b.jpg", Path::new("/m/b.jpg"), None, 1)
            .unwrap();
        store.submit(&record("post", vec![linked])).unwrap();

        assert_eq!(store.remove_media(linked).unwrap(), None);
        assert_eq!(store.remove_media(loose).unwrap().as_deref(), Some("/m/b.jpg"));
        assert!(store.get_media(loose).unwrap().is_none());
        assert!(store.get_media(linked).unwrap().is_some());
    }

    #[test]
    fn test_media_only_record_is_accepted() {
        let store = ActivityStore::open_in_memory().unwrap();
        let m = store
            .register_media("https://img/a.gif", Path::new("/m/a.gif"), None, 1)
            .unwrap();
        store.submit(&record("", vec![m])).unwrap();
        assert_eq!(store.count_activities().unwrap(), 1);
        assert_eq!(store.get_media(m).unwrap().unwrap().byte_size, 1);
    }
}
