use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::{NotificationChannel, PersistenceApi};
use dispatch_core::types::{DialogId, UserId};

/// Reference `PersistenceApi` implementation backed by a single SQLite
/// connection guarded by a mutex — the same shape as
/// `skynet_sessions::manager::SessionManager` and
/// `skynet_memory::manager::MemoryManager`.
pub struct SqlitePersistence {
    db: Mutex<Connection>,
}

impl SqlitePersistence {
    /// Wrap an already-open connection and ensure the schema exists.
    pub fn new(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    /// Open (or create) a database file at `path` and initialise the schema.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::new(conn)
    }

    /// In-memory database, handy for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::new(conn)
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS dialog_context (
            dialog_id INTEGER PRIMARY KEY,
            context   TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS dialog_transcript (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            dialog_id INTEGER NOT NULL,
            entry     TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_transcript_dialog
            ON dialog_transcript(dialog_id, id);

        CREATE TABLE IF NOT EXISTS dialog_meta (
            dialog_id INTEGER PRIMARY KEY,
            meta      TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS notification_channels (
            user_id       INTEGER NOT NULL,
            channel_type  TEXT NOT NULL,
            channel_value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS user_subscriptions (
            user_id INTEGER PRIMARY KEY,
            doc     TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

impl PersistenceApi for SqlitePersistence {
    #[instrument(skip(self), fields(dialog_id = %dialog_id))]
    fn read_context(&self, dialog_id: DialogId) -> Result<Option<String>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT context FROM dialog_context WHERE dialog_id = ?1",
            rusqlite::params![dialog_id.0 as i64],
            |row| row.get::<_, String>(0),
        ) {
            Ok(json) => Ok(Some(json)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, json), fields(dialog_id = %dialog_id))]
    fn save_context(&self, dialog_id: DialogId, json: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO dialog_context (dialog_id, context, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(dialog_id) DO UPDATE SET context = excluded.context,
                                                   updated_at = excluded.updated_at",
            rusqlite::params![dialog_id.0 as i64, json, now],
        )?;
        debug!("context saved");
        Ok(())
    }

    #[instrument(skip(self, entry_json), fields(dialog_id = %dialog_id))]
    fn save_dialog(&self, dialog_id: DialogId, entry_json: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO dialog_transcript (dialog_id, entry, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![dialog_id.0 as i64, entry_json, now],
        )?;
        Ok(())
    }

    fn read_dialog(&self, dialog_id: DialogId, limit: usize) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT entry FROM dialog_transcript
             WHERE dialog_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![dialog_id.0 as i64, limit as i64],
            |row| row.get::<_, String>(0),
        )?;
        let mut entries: Vec<String> = rows.filter_map(|r| r.ok()).collect();
        entries.reverse(); // oldest first
        Ok(entries)
    }

    fn update_dialogs_meta(&self, dialog_id: DialogId, meta_json: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO dialog_meta (dialog_id, meta, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(dialog_id) DO UPDATE SET meta = excluded.meta,
                                                   updated_at = excluded.updated_at",
            rusqlite::params![dialog_id.0 as i64, meta_json, now],
        )?;
        Ok(())
    }

    fn get_notification_channels(&self, user_id: UserId) -> Result<Vec<NotificationChannel>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT channel_type, channel_value FROM notification_channels WHERE user_id = ?1",
        )?;
        let rows = stmt.query_map(rusqlite::params![user_id.0], |row| {
            Ok(NotificationChannel {
                channel_type: row.get(0)?,
                channel_value: row.get(1)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn get_user_subscription_limits(&self, user_id: UserId) -> Result<Option<String>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT doc FROM user_subscriptions WHERE user_id = ?1",
            rusqlite::params![user_id.0],
            |row| row.get::<_, String>(0),
        ) {
            Ok(json) => Ok(Some(json)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_context_is_none_for_new_dialog() {
        let store = SqlitePersistence::open_in_memory().unwrap();
        assert_eq!(store.read_context(DialogId(1)).unwrap(), None);
    }

    #[test]
    fn save_then_read_context_round_trips() {
        let store = SqlitePersistence::open_in_memory().unwrap();
        store.save_context(DialogId(1), r#"{"thread_id":"abc"}"#).unwrap();
        assert_eq!(
            store.read_context(DialogId(1)).unwrap(),
            Some(r#"{"thread_id":"abc"}"#.to_string())
        );
    }

    #[test]
    fn save_context_upserts() {
        let store = SqlitePersistence::open_in_memory().unwrap();
        store.save_context(DialogId(1), "\"a\"").unwrap();
        store.save_context(DialogId(1), "\"b\"").unwrap();
        assert_eq!(store.read_context(DialogId(1)).unwrap(), Some("\"b\"".to_string()));
    }

    #[test]
    fn transcript_preserves_insertion_order() {
        let store = SqlitePersistence::open_in_memory().unwrap();
        store.save_dialog(DialogId(7), "\"one\"").unwrap();
        store.save_dialog(DialogId(7), "\"two\"").unwrap();
        store.save_dialog(DialogId(7), "\"three\"").unwrap();
        let rows = store.read_dialog(DialogId(7), 10).unwrap();
        assert_eq!(rows, vec!["\"one\"", "\"two\"", "\"three\""]);
    }

    #[test]
    fn transcript_limit_keeps_most_recent() {
        let store = SqlitePersistence::open_in_memory().unwrap();
        for i in 0..5 {
            store.save_dialog(DialogId(7), &format!("\"{i}\"")).unwrap();
        }
        let rows = store.read_dialog(DialogId(7), 2).unwrap();
        assert_eq!(rows, vec!["\"3\"", "\"4\""]);
    }

    #[test]
    fn subscription_limits_absent_by_default() {
        let store = SqlitePersistence::open_in_memory().unwrap();
        assert_eq!(store.get_user_subscription_limits(UserId(1)).unwrap(), None);
    }
}
