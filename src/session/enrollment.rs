//! Voice enrollment for `/ws/users` sessions.

use crate::audio::wav::{PcmFormat, write_wav};
use crate::config::Config;
use crate::error::Result;
use crate::providers::Providers;
use crate::speaker::cache::{Embedding, EmbeddingCache};
use crate::store::ConversationStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollOutcome {
    /// No audio was captured.
    EmptySession,
    /// The user id has no row in the store.
    UnknownUser,
    /// The embedder found nothing usable in the recording.
    NoEmbedding { audio_path: PathBuf },
    Enrolled {
        user_uid: i64,
        audio_path: PathBuf,
        dimensions: usize,
    },
}

/// Turns an enrollment recording into a stored, cached reference embedding.
#[derive(Clone)]
pub struct VoiceEnrollment {
    providers: Providers,
    store: Arc<dyn ConversationStore>,
    cache: Arc<EmbeddingCache>,
    audio_dir: PathBuf,
    format: PcmFormat,
}

impl VoiceEnrollment {
    pub fn new(
        providers: Providers,
        store: Arc<dyn ConversationStore>,
        cache: Arc<EmbeddingCache>,
        config: &Config,
    ) -> Self {
        Self {
            providers,
            store,
            cache,
            audio_dir: config.storage.audio_dir.clone(),
            format: PcmFormat::from(&config.audio),
        }
    }

    pub async fn enroll(
        &self,
        session_id: &str,
        user_id: &str,
        audio: Vec<u8>,
    ) -> Result<EnrollOutcome> {
        let enrollment = self.clone();
        let session_id = session_id.to_string();
        let user_id = user_id.to_string();
        tokio::task::spawn_blocking(move || enrollment.enroll_blocking(&session_id, &user_id, &audio))
            .await?
    }

    pub fn enroll_blocking(
        &self,
        session_id: &str,
        user_id: &str,
        audio: &[u8],
    ) -> Result<EnrollOutcome> {
        if audio.is_empty() {
            return Ok(EnrollOutcome::EmptySession);
        }
        let Some(user_uid) = self.store.resolve_user_uid(user_id)? else {
            warn!(session_id, user_id, "enrollment for unknown user ignored");
            return Ok(EnrollOutcome::UnknownUser);
        };

        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let audio_path = self
            .audio_dir
            .join(format!("enroll_{}_{}.wav", stamp, session_id));
        write_wav(&audio_path, audio, self.format)?;

        let Some(embedding) = self.providers.embedder.extract(&audio_path)? else {
            warn!(session_id, user_id, "no embedding extracted from enrollment audio");
            return Ok(EnrollOutcome::NoEmbedding { audio_path });
        };

        self.store.save_voice_embedding(user_uid, &embedding)?;
        let stored: Embedding = self.cache.insert(user_id, embedding);
        info!(
            session_id,
            user_id,
            user_uid,
            dimensions = stored.len(),
            "voice enrolled"
        );
        Ok(EnrollOutcome::Enrolled {
            user_uid,
            audio_path,
            dimensions: stored.len(),
        })
    }
}
