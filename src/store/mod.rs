//! Persistence of users, enrolled voices and finalized conversations.

pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::emotion::EmotionAnalysis;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// One finalized session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationMaster {
    pub uid: i64,
    pub user_uid: i64,
    pub topic: Option<String>,
    pub audio_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One diarized utterance of a finalized session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationDetail {
    pub uid: i64,
    pub master_uid: i64,
    pub sentence: String,
    pub speaker: String,
    pub emotion_result: serde_json::Value,
    pub dominant_emotion: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// Detail row as produced by finalization.
#[derive(Debug, Clone)]
pub struct NewDetail<'a> {
    pub master_uid: i64,
    pub sentence: &'a str,
    pub speaker: &'a str,
    pub emotion: &'a EmotionAnalysis,
    pub dominant_emotion: &'a str,
    pub start_ms: u64,
    pub end_ms: u64,
}

/// Registered user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRecord {
    pub uid: i64,
    pub user_id: String,
    pub user_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Synchronous store contract. Called from the blocking pool.
pub trait ConversationStore: Send + Sync {
    /// Internal numeric id for an external user id.
    fn resolve_user_uid(&self, user_id: &str) -> Result<Option<i64>>;

    /// Create the user or update its display name; returns the uid.
    fn upsert_user(&self, user_id: &str, user_name: Option<&str>) -> Result<i64>;

    fn list_users(&self) -> Result<Vec<UserRecord>>;

    fn load_voice_embedding(&self, user_uid: i64) -> Result<Option<Vec<f32>>>;

    /// Insert or replace the user's enrolled embedding.
    fn save_voice_embedding(&self, user_uid: i64, embedding: &[f32]) -> Result<()>;

    fn create_master(&self, user_uid: i64, topic: Option<&str>) -> Result<i64>;

    fn update_master_audio_path(&self, master_uid: i64, audio_path: &str) -> Result<()>;

    fn insert_detail(&self, detail: &NewDetail<'_>) -> Result<i64>;

    fn get_master(&self, master_uid: i64) -> Result<Option<ConversationMaster>>;

    /// Newest first.
    fn list_masters(&self, user_uid: i64) -> Result<Vec<ConversationMaster>>;

    /// Insertion order.
    fn list_details(&self, master_uid: i64) -> Result<Vec<ConversationDetail>>;

    /// Enrolled embedding looked up by external user id.
    fn voice_embedding_for(&self, user_id: &str) -> Result<Option<Vec<f32>>> {
        match self.resolve_user_uid(user_id)? {
            Some(uid) => self.load_voice_embedding(uid),
            None => Ok(None),
        }
    }
}

impl<T: ConversationStore + ?Sized> ConversationStore for Arc<T> {
    fn resolve_user_uid(&self, user_id: &str) -> Result<Option<i64>> {
        (**self).resolve_user_uid(user_id)
    }

    fn upsert_user(&self, user_id: &str, user_name: Option<&str>) -> Result<i64> {
        (**self).upsert_user(user_id, user_name)
    }

    fn list_users(&self) -> Result<Vec<UserRecord>> {
        (**self).list_users()
    }

    fn load_voice_embedding(&self, user_uid: i64) -> Result<Option<Vec<f32>>> {
        (**self).load_voice_embedding(user_uid)
    }

    fn save_voice_embedding(&self, user_uid: i64, embedding: &[f32]) -> Result<()> {
        (**self).save_voice_embedding(user_uid, embedding)
    }

    fn create_master(&self, user_uid: i64, topic: Option<&str>) -> Result<i64> {
        (**self).create_master(user_uid, topic)
    }

    fn update_master_audio_path(&self, master_uid: i64, audio_path: &str) -> Result<()> {
        (**self).update_master_audio_path(master_uid, audio_path)
    }

    fn insert_detail(&self, detail: &NewDetail<'_>) -> Result<i64> {
        (**self).insert_detail(detail)
    }

    fn get_master(&self, master_uid: i64) -> Result<Option<ConversationMaster>> {
        (**self).get_master(master_uid)
    }

    fn list_masters(&self, user_uid: i64) -> Result<Vec<ConversationMaster>> {
        (**self).list_masters(user_uid)
    }

    fn list_details(&self, master_uid: i64) -> Result<Vec<ConversationDetail>> {
        (**self).list_details(master_uid)
    }
}
