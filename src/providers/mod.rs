//! Contracts for the out-of-process analysis backends.
//!
//! Every provider is a synchronous, thread-safe trait called from tokio's
//! blocking pool. Implementations return typed [`ProviderError`]s; the
//! streaming core and finalization decide how each failure degrades.

pub mod http;
pub mod mock;

use crate::emotion::EmotionAnalysis;
use crate::error::ProviderError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Low-latency transcription of one short PCM chunk.
pub trait StreamingTranscriber: Send + Sync {
    /// Transcribe raw 16-bit mono PCM.
    ///
    /// Silence is `Ok(None)` (or an empty string), never an error.
    fn transcribe(&self, pcm: &[u8]) -> ProviderResult<Option<String>>;
}

/// One speaker-labeled utterance from batch diarization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiarizedSegment {
    pub speaker: String,
    pub text: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

/// Full-recording transcription with speaker diarization.
pub trait BatchTranscriber: Send + Sync {
    /// Segments in diarization order. Empty means nothing to report.
    fn transcribe_batch(&self, wav_path: &Path) -> ProviderResult<Vec<DiarizedSegment>>;
}

/// One utterance submitted to batched emotion analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct EmotionInput {
    pub text: String,
    pub speaker: String,
    pub waveform: Option<Vec<f32>>,
}

/// Text + audio emotion scoring.
///
/// Waveforms are normalized mono samples at the configured
/// `audio.sample_rate`, for streamed chunks and finalized segments alike.
pub trait EmotionAnalyzer: Send + Sync {
    fn analyze(&self, text: &str, waveform: &[f32]) -> ProviderResult<EmotionAnalysis>;

    /// Analyze a whole conversation in one call so the backend sees context.
    ///
    /// Must return exactly one analysis per input, in order. The default
    /// scores each utterance on its own.
    fn analyze_many(&self, inputs: &[EmotionInput]) -> ProviderResult<Vec<EmotionAnalysis>> {
        inputs
            .iter()
            .map(|input| self.analyze(&input.text, input.waveform.as_deref().unwrap_or(&[])))
            .collect()
    }
}

/// Speaker embedding extraction.
pub trait VoiceEmbedder: Send + Sync {
    /// `Ok(None)` when the audio is unusable (e.g. too short).
    fn extract(&self, wav_path: &Path) -> ProviderResult<Option<Vec<f32>>>;
}

/// Implement provider traits for Arc<T> to allow sharing across sessions.
impl<T: StreamingTranscriber + ?Sized> StreamingTranscriber for Arc<T> {
    fn transcribe(&self, pcm: &[u8]) -> ProviderResult<Option<String>> {
        (**self).transcribe(pcm)
    }
}

impl<T: BatchTranscriber + ?Sized> BatchTranscriber for Arc<T> {
    fn transcribe_batch(&self, wav_path: &Path) -> ProviderResult<Vec<DiarizedSegment>> {
        (**self).transcribe_batch(wav_path)
    }
}

impl<T: EmotionAnalyzer + ?Sized> EmotionAnalyzer for Arc<T> {
    fn analyze(&self, text: &str, waveform: &[f32]) -> ProviderResult<EmotionAnalysis> {
        (**self).analyze(text, waveform)
    }

    fn analyze_many(&self, inputs: &[EmotionInput]) -> ProviderResult<Vec<EmotionAnalysis>> {
        (**self).analyze_many(inputs)
    }
}

impl<T: VoiceEmbedder + ?Sized> VoiceEmbedder for Arc<T> {
    fn extract(&self, wav_path: &Path) -> ProviderResult<Option<Vec<f32>>> {
        (**self).extract(wav_path)
    }
}

/// The full set of backends a session needs.
#[derive(Clone)]
pub struct Providers {
    pub transcriber: Arc<dyn StreamingTranscriber>,
    pub diarizer: Arc<dyn BatchTranscriber>,
    pub emotion: Arc<dyn EmotionAnalyzer>,
    pub embedder: Arc<dyn VoiceEmbedder>,
}

impl Providers {
    /// Route every concern to one HTTP backend.
    pub fn from_http(backend: http::HttpProviders) -> Self {
        let backend = Arc::new(backend);
        Self {
            transcriber: backend.clone(),
            diarizer: backend.clone(),
            emotion: backend.clone(),
            embedder: backend,
        }
    }
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers").finish_non_exhaustive()
    }
}
