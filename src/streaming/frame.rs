//! Data that flows between the streaming stages.

use crate::emotion::EmotionAnalysis;
use serde::Serialize;
use std::sync::Arc;

/// A fixed-size slice of session audio ready for analysis.
///
/// Cheap to clone; the bytes are never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position in the session, contiguous from 0.
    pub sequence: u64,
    /// Raw 16-bit little-endian mono PCM.
    pub bytes: Arc<[u8]>,
}

impl Chunk {
    pub fn new(sequence: u64, bytes: Vec<u8>) -> Self {
        Self {
            sequence,
            bytes: bytes.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Deliverable analysis of one chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub sequence: u64,
    pub transcript: String,
    pub emotion: EmotionAnalysis,
    /// `None` when the user has no enrolled voice or extraction failed.
    pub is_same: Option<bool>,
    pub similarity: Option<f32>,
}

/// How the analysis of one chunk resolved.
///
/// Every variant advances the sequencer; only `Payload` reaches the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    Payload(Box<AnalysisResult>),
    NoSpeech,
    TimedOut,
    /// Provider or decode failure, labeled by [`crate::error::ProviderError::kind`].
    Failed(&'static str),
}

impl ChunkOutcome {
    pub fn is_deliverable(&self) -> bool {
        matches!(self, ChunkOutcome::Payload(_))
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            ChunkOutcome::Payload(_) => "payload",
            ChunkOutcome::NoSpeech => "no_speech",
            ChunkOutcome::TimedOut => "timed_out",
            ChunkOutcome::Failed(kind) => *kind,
        }
    }

    pub fn into_payload(self) -> Option<AnalysisResult> {
        match self {
            ChunkOutcome::Payload(result) => Some(*result),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_payload_is_deliverable() {
        let payload = ChunkOutcome::Payload(Box::new(AnalysisResult {
            sequence: 3,
            transcript: "hi".into(),
            emotion: EmotionAnalysis::neutral(),
            is_same: None,
            similarity: None,
        }));
        assert!(payload.is_deliverable());
        assert!(!ChunkOutcome::NoSpeech.is_deliverable());
        assert!(!ChunkOutcome::TimedOut.is_deliverable());
        assert!(!ChunkOutcome::Failed("decode").is_deliverable());
        assert_eq!(payload.into_payload().map(|r| r.sequence), Some(3));
    }

    #[test]
    fn failed_label_is_provider_kind() {
        assert_eq!(ChunkOutcome::Failed("unavailable").label(), "unavailable");
        assert_eq!(ChunkOutcome::TimedOut.label(), "timed_out");
    }

    #[test]
    fn chunk_clones_share_bytes() {
        let chunk = Chunk::new(0, vec![1, 2, 3, 4]);
        let clone = chunk.clone();
        assert!(Arc::ptr_eq(&chunk.bytes, &clone.bytes));
        assert_eq!(clone.len(), 4);
    }
}
