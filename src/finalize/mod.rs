//! End-of-session batch re-analysis and persistence.
//!
//! Runs once per session on the full recording: diarize, cut per-utterance
//! WAVs, score emotion with conversation context, verify the speaker and
//! write one master row plus one detail row per utterance.

use crate::audio::cutter::{Span, cut_wav_by_timestamps};
use crate::audio::wav::{PcmFormat, read_waveform, write_wav};
use crate::config::Config;
use crate::defaults::UNKNOWN_USER_UID;
use crate::emotion::EmotionAnalysis;
use crate::error::Result;
use crate::providers::{DiarizedSegment, EmotionInput, Providers};
use crate::speaker::SpeakerVerdict;
use crate::speaker::cache::Embedding;
use crate::store::{ConversationStore, NewDetail};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Everything finalization needs from a closed session.
#[derive(Debug, Clone)]
pub struct FinalizeRequest {
    pub session_id: String,
    pub user_id: Option<String>,
    pub topic: Option<String>,
    /// Full-session raw PCM.
    pub audio: Vec<u8>,
    /// Enrolled voice of the session's user, if any.
    pub reference: Option<Embedding>,
}

/// Summary of a persisted conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeReport {
    pub master_id: i64,
    pub audio_path: PathBuf,
    pub details_written: usize,
    pub details_failed: usize,
    /// Segments whose voice matched the enrolled user.
    pub user_segments: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// No audio was captured; nothing was written.
    EmptySession,
    /// Audio was saved but diarization found nothing to record.
    NoSegments { audio_path: PathBuf },
    Persisted(FinalizeReport),
}

/// One diarized utterance with bounds clamped to the recording.
struct Utterance {
    segment: DiarizedSegment,
    wav: PathBuf,
    waveform: Option<Vec<f32>>,
}

#[derive(Clone)]
pub struct FinalizationPipeline {
    providers: Providers,
    store: Arc<dyn ConversationStore>,
    audio_dir: PathBuf,
    format: PcmFormat,
    threshold: f32,
}

impl FinalizationPipeline {
    pub fn new(providers: Providers, store: Arc<dyn ConversationStore>, config: &Config) -> Self {
        Self {
            providers,
            store,
            audio_dir: config.storage.audio_dir.clone(),
            format: PcmFormat::from(&config.audio),
            threshold: config.finalize.similarity_threshold,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Run on the blocking pool.
    pub async fn run(&self, request: FinalizeRequest) -> Result<FinalizeOutcome> {
        let pipeline = self.clone();
        tokio::task::spawn_blocking(move || pipeline.run_blocking(request)).await?
    }

    pub fn run_blocking(&self, request: FinalizeRequest) -> Result<FinalizeOutcome> {
        let session = request.session_id.as_str();
        if request.audio.is_empty() {
            debug!(session_id = session, "empty session, nothing to finalize");
            return Ok(FinalizeOutcome::EmptySession);
        }

        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let audio_path = self
            .audio_dir
            .join(format!("session_{}_{}.wav", stamp, session));
        write_wav(&audio_path, &request.audio, self.format)?;
        info!(session_id = session, path = %audio_path.display(), bytes = request.audio.len(), "session audio saved");

        let raw_segments = self.providers.diarizer.transcribe_batch(&audio_path)?;
        let total_ms = self.format.duration_ms(request.audio.len());
        let segments = clean_segments(raw_segments, total_ms);
        if segments.is_empty() {
            info!(session_id = session, "diarization found no segments");
            return Ok(FinalizeOutcome::NoSegments { audio_path });
        }

        let user_uid = self.resolve_user(session, request.user_id.as_deref());
        let master_id = self.store.create_master(user_uid, request.topic.as_deref())?;
        info!(session_id = session, master_id, user_uid, segments = segments.len(), "conversation master created");

        let cut_dir = self
            .audio_dir
            .join("segments")
            .join(format!("{}_{}", stamp, session));
        let utterances = self.cut(session, &audio_path, &cut_dir, segments);
        let emotions = self.analyze_emotions(session, &utterances);

        let mut report = FinalizeReport {
            master_id,
            audio_path: audio_path.clone(),
            details_written: 0,
            details_failed: 0,
            user_segments: 0,
        };

        for (index, (utterance, emotion)) in utterances.iter().zip(&emotions).enumerate() {
            if let Some(reference) = &request.reference
                && let Some(verdict) = self.verify(session, index, reference, &utterance.wav)
                && verdict.is_same
            {
                report.user_segments += 1;
            }

            let segment = &utterance.segment;
            let detail = NewDetail {
                master_uid: master_id,
                sentence: &segment.text,
                speaker: &segment.speaker,
                emotion,
                dominant_emotion: emotion.dominant(),
                start_ms: segment.start_ms,
                end_ms: segment.end_ms,
            };
            match self.store.insert_detail(&detail) {
                Ok(_) => report.details_written += 1,
                Err(e) => {
                    error!(session_id = session, master_id, segment = index, error = %e, "failed to insert conversation detail");
                    report.details_failed += 1;
                }
            }
        }

        self.store
            .update_master_audio_path(master_id, &audio_path.to_string_lossy())?;
        info!(
            session_id = session,
            master_id,
            written = report.details_written,
            failed = report.details_failed,
            user_segments = report.user_segments,
            "conversation finalized"
        );
        Ok(FinalizeOutcome::Persisted(report))
    }

    fn resolve_user(&self, session: &str, user_id: Option<&str>) -> i64 {
        let Some(user_id) = user_id else {
            return UNKNOWN_USER_UID;
        };
        match self.store.resolve_user_uid(user_id) {
            Ok(Some(uid)) => uid,
            Ok(None) => {
                warn!(session_id = session, user_id, "unknown user, recording as anonymous");
                UNKNOWN_USER_UID
            }
            Err(e) => {
                warn!(session_id = session, user_id, error = %e, "user lookup failed, recording as anonymous");
                UNKNOWN_USER_UID
            }
        }
    }

    /// Cut one WAV per segment, falling back to the full recording.
    fn cut(
        &self,
        session: &str,
        audio_path: &Path,
        cut_dir: &Path,
        segments: Vec<DiarizedSegment>,
    ) -> Vec<Utterance> {
        let spans: Vec<Span> = segments
            .iter()
            .map(|s| Span::new(s.start_ms, s.end_ms))
            .collect();
        let wavs = match cut_wav_by_timestamps(audio_path, &spans, cut_dir) {
            Ok(paths) => paths,
            Err(e) => {
                warn!(session_id = session, error = %e, "segment cut failed, using full recording");
                vec![audio_path.to_path_buf(); spans.len()]
            }
        };

        segments
            .into_iter()
            .zip(wavs)
            .enumerate()
            .map(|(index, (segment, wav))| {
                let waveform = match read_waveform(&wav, self.format) {
                    Ok(waveform) => Some(waveform),
                    Err(e) => {
                        warn!(session_id = session, segment = index, error = %e, "cannot decode segment audio");
                        None
                    }
                };
                Utterance {
                    segment,
                    wav,
                    waveform,
                }
            })
            .collect()
    }

    /// Batched emotion with per-utterance fallback, then neutral.
    fn analyze_emotions(&self, session: &str, utterances: &[Utterance]) -> Vec<EmotionAnalysis> {
        let inputs: Vec<EmotionInput> = utterances
            .iter()
            .map(|u| EmotionInput {
                text: u.segment.text.clone(),
                speaker: u.segment.speaker.clone(),
                waveform: u.waveform.clone(),
            })
            .collect();

        match self.providers.emotion.analyze_many(&inputs) {
            Ok(batch) if batch.len() == inputs.len() => return batch,
            Ok(batch) => warn!(
                session_id = session,
                expected = inputs.len(),
                got = batch.len(),
                "batched emotion returned wrong count, analyzing per segment"
            ),
            Err(e) => warn!(session_id = session, error = %e, "batched emotion failed, analyzing per segment"),
        }

        inputs
            .iter()
            .enumerate()
            .map(|(index, input)| {
                self.providers
                    .emotion
                    .analyze(&input.text, input.waveform.as_deref().unwrap_or(&[]))
                    .unwrap_or_else(|e| {
                        warn!(session_id = session, segment = index, error = %e, "emotion failed, using neutral scores");
                        EmotionAnalysis::neutral()
                    })
            })
            .collect()
    }

    fn verify(
        &self,
        session: &str,
        index: usize,
        reference: &[f32],
        wav: &Path,
    ) -> Option<SpeakerVerdict> {
        match self.providers.embedder.extract(wav) {
            Ok(Some(embedding)) => {
                let verdict = SpeakerVerdict::compare(reference, &embedding, self.threshold);
                debug!(
                    session_id = session,
                    segment = index,
                    similarity = verdict.similarity,
                    is_same = verdict.is_same,
                    "segment speaker verified"
                );
                Some(verdict)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(session_id = session, segment = index, error = %e, "segment embedding failed");
                None
            }
        }
    }
}

/// Drop empty utterances and clamp bounds to `[0, total_ms]`.
///
/// Segments that collapse to `start >= end` are dropped. Order is kept.
fn clean_segments(segments: Vec<DiarizedSegment>, total_ms: u64) -> Vec<DiarizedSegment> {
    segments
        .into_iter()
        .filter_map(|mut segment| {
            let text = segment.text.trim();
            if text.is_empty() {
                return None;
            }
            segment.text = text.to_string();
            segment.end_ms = segment.end_ms.min(total_ms);
            segment.start_ms = segment.start_ms.min(segment.end_ms);
            (segment.start_ms < segment.end_ms).then_some(segment)
        })
        .collect()
}
