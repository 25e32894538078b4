//! SQLite-backed [`ConversationStore`].

use super::{ConversationDetail, ConversationMaster, ConversationStore, NewDetail, UserRecord};
use crate::error::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    uid INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL UNIQUE,
    user_name TEXT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_voice_embeddings (
    uid INTEGER PRIMARY KEY AUTOINCREMENT,
    user_uid INTEGER NOT NULL UNIQUE,
    embedding BLOB NOT NULL,
    created_at TEXT NOT NULL,
    FOREIGN KEY(user_uid) REFERENCES users(uid) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS conversation_master (
    uid INTEGER PRIMARY KEY AUTOINCREMENT,
    user_uid INTEGER NOT NULL,
    topic TEXT NULL,
    audio_path TEXT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_conversation_master_user ON conversation_master(user_uid);

CREATE TABLE IF NOT EXISTS conversation_detail (
    uid INTEGER PRIMARY KEY AUTOINCREMENT,
    master_uid INTEGER NOT NULL,
    sentence TEXT NOT NULL,
    speaker TEXT NOT NULL,
    emotion_result TEXT NOT NULL,
    dominant_emotion TEXT NOT NULL,
    start_ms INTEGER NOT NULL,
    end_ms INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    FOREIGN KEY(master_uid) REFERENCES conversation_master(uid) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_conversation_detail_master ON conversation_detail(master_uid);
"#;

/// Single-connection SQLite store.
///
/// The connection is shared behind a mutex; every call is short and runs on
/// the blocking pool.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn master_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationMaster> {
    Ok(ConversationMaster {
        uid: row.get(0)?,
        user_uid: row.get(1)?,
        topic: row.get(2)?,
        audio_path: row.get(3)?,
        created_at: row.get(4)?,
    })
}

impl SqliteStore {
    /// Open or create the database file and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    /// Fresh private database, for tests and dry runs.
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl ConversationStore for SqliteStore {
    fn resolve_user_uid(&self, user_id: &str) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        let uid = conn
            .query_row(
                "SELECT uid FROM users WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(uid)
    }

    fn upsert_user(&self, user_id: &str, user_name: Option<&str>) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO users (user_id, user_name, created_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id) DO UPDATE SET user_name = COALESCE(excluded.user_name, users.user_name)
            "#,
            params![user_id, user_name, Utc::now()],
        )?;
        let uid = conn.query_row(
            "SELECT uid FROM users WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(uid)
    }

    fn list_users(&self) -> Result<Vec<UserRecord>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT uid, user_id, user_name, created_at FROM users ORDER BY uid ASC")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(UserRecord {
                    uid: row.get(0)?,
                    user_id: row.get(1)?,
                    user_name: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn load_voice_embedding(&self, user_uid: i64) -> Result<Option<Vec<f32>>> {
        let conn = self.conn.lock();
        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT embedding FROM user_voice_embeddings WHERE user_uid = ?1",
                params![user_uid],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blob.map(|b| blob_to_embedding(&b)))
    }

    fn save_voice_embedding(&self, user_uid: i64, embedding: &[f32]) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO user_voice_embeddings (user_uid, embedding, created_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(user_uid) DO UPDATE SET embedding = excluded.embedding, created_at = excluded.created_at
            "#,
            params![user_uid, embedding_to_blob(embedding), Utc::now()],
        )?;
        Ok(())
    }

    fn create_master(&self, user_uid: i64, topic: Option<&str>) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO conversation_master (user_uid, topic, audio_path, created_at) VALUES (?1, ?2, NULL, ?3)",
            params![user_uid, topic, Utc::now()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn update_master_audio_path(&self, master_uid: i64, audio_path: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE conversation_master SET audio_path = ?1 WHERE uid = ?2",
            params![audio_path, master_uid],
        )?;
        Ok(())
    }

    fn insert_detail(&self, detail: &NewDetail<'_>) -> Result<i64> {
        let emotion_json = serde_json::to_string(detail.emotion)?;
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO conversation_detail
                (master_uid, sentence, speaker, emotion_result, dominant_emotion, start_ms, end_ms, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                detail.master_uid,
                detail.sentence,
                detail.speaker,
                emotion_json,
                detail.dominant_emotion,
                detail.start_ms as i64,
                detail.end_ms as i64,
                Utc::now()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_master(&self, master_uid: i64) -> Result<Option<ConversationMaster>> {
        let conn = self.conn.lock();
        let master = conn
            .query_row(
                "SELECT uid, user_uid, topic, audio_path, created_at FROM conversation_master WHERE uid = ?1",
                params![master_uid],
                master_from_row,
            )
            .optional()?;
        Ok(master)
    }

    fn list_masters(&self, user_uid: i64) -> Result<Vec<ConversationMaster>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT uid, user_uid, topic, audio_path, created_at FROM conversation_master
            WHERE user_uid = ?1 ORDER BY created_at DESC, uid DESC
            "#,
        )?;
        let rows = stmt
            .query_map(params![user_uid], master_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn list_details(&self, master_uid: i64) -> Result<Vec<ConversationDetail>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT uid, master_uid, sentence, speaker, emotion_result, dominant_emotion,
                   start_ms, end_ms, created_at
            FROM conversation_detail WHERE master_uid = ?1 ORDER BY uid ASC
            "#,
        )?;
        let raw = stmt
            .query_map(params![master_uid], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, i64>(7)?,
                    row.get::<_, DateTime<Utc>>(8)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        raw.into_iter()
            .map(
                |(uid, master_uid, sentence, speaker, emotion, dominant, start, end, created_at)|
                 -> Result<ConversationDetail> {
                    Ok(ConversationDetail {
                        uid,
                        master_uid,
                        sentence,
                        speaker,
                        emotion_result: serde_json::from_str(&emotion)?,
                        dominant_emotion: dominant,
                        start_ms: start.max(0) as u64,
                        end_ms: end.max(0) as u64,
                        created_at,
                    })
                },
            )
            .collect()
    }
}
