//! Scriptable in-process providers for tests and local development.

use super::{
    BatchTranscriber, DiarizedSegment, EmotionAnalyzer, EmotionInput, ProviderResult,
    StreamingTranscriber, VoiceEmbedder,
};
use crate::emotion::{EmotionAnalysis, EmotionScores, scores};
use crate::error::ProviderError;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

fn mock_failure(what: &str) -> ProviderError {
    ProviderError::Unavailable(format!("mock {} failure", what))
}

/// Mock streaming transcriber returning a fixed response.
#[derive(Debug, Clone)]
pub struct MockTranscriber {
    response: Option<String>,
    should_fail: bool,
    delay: Option<Duration>,
    calls: CallCounter,
}

impl Default for MockTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTranscriber {
    /// Create a new mock transcriber with default settings
    pub fn new() -> Self {
        Self {
            response: Some("mock transcription".to_string()),
            should_fail: false,
            delay: None,
            calls: CallCounter::default(),
        }
    }

    /// Configure the mock to return a specific response
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = Some(response.to_string());
        self
    }

    /// Report no speech for every chunk
    pub fn silent(mut self) -> Self {
        self.response = None;
        self
    }

    /// Configure the mock to fail on transcribe
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Block the calling thread before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl StreamingTranscriber for MockTranscriber {
    fn transcribe(&self, _pcm: &[u8]) -> ProviderResult<Option<String>> {
        self.calls.hit();
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.should_fail {
            return Err(mock_failure("transcription"));
        }
        Ok(self.response.clone())
    }
}

/// Streaming transcriber backed by a closure, for per-chunk scripting.
pub struct FnTranscriber<F>(pub F);

impl<F> StreamingTranscriber for FnTranscriber<F>
where
    F: Fn(&[u8]) -> ProviderResult<Option<String>> + Send + Sync,
{
    fn transcribe(&self, pcm: &[u8]) -> ProviderResult<Option<String>> {
        (self.0)(pcm)
    }
}

/// Mock batch transcriber returning a fixed segment list.
#[derive(Debug, Clone, Default)]
pub struct MockDiarizer {
    segments: Vec<DiarizedSegment>,
    should_fail: bool,
    calls: CallCounter,
}

impl MockDiarizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_segments(mut self, segments: Vec<DiarizedSegment>) -> Self {
        self.segments = segments;
        self
    }

    /// Append one segment.
    pub fn with_segment(mut self, speaker: &str, text: &str, start_ms: u64, end_ms: u64) -> Self {
        self.segments.push(DiarizedSegment {
            speaker: speaker.to_string(),
            text: text.to_string(),
            start_ms,
            end_ms,
        });
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl BatchTranscriber for MockDiarizer {
    fn transcribe_batch(&self, _wav_path: &Path) -> ProviderResult<Vec<DiarizedSegment>> {
        self.calls.hit();
        if self.should_fail {
            return Err(mock_failure("diarization"));
        }
        Ok(self.segments.clone())
    }
}

/// Mock emotion analyzer returning the same scores for every utterance.
#[derive(Debug, Clone)]
pub struct MockEmotionAnalyzer {
    text_scores: EmotionScores,
    audio_scores: EmotionScores,
    fail_single: bool,
    fail_batch: bool,
    single_calls: CallCounter,
    batch_calls: CallCounter,
}

impl Default for MockEmotionAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmotionAnalyzer {
    pub fn new() -> Self {
        Self {
            text_scores: scores(&[("positive", 0.7), ("negative", 0.1), ("neutral", 0.2)]),
            audio_scores: scores(&[("happy", 0.6), ("neutral", 0.3), ("sad", 0.1)]),
            fail_single: false,
            fail_batch: false,
            single_calls: CallCounter::default(),
            batch_calls: CallCounter::default(),
        }
    }

    pub fn with_text_scores(mut self, scores: EmotionScores) -> Self {
        self.text_scores = scores;
        self
    }

    pub fn with_audio_scores(mut self, scores: EmotionScores) -> Self {
        self.audio_scores = scores;
        self
    }

    /// Fail both single and batched calls
    pub fn with_failure(mut self) -> Self {
        self.fail_single = true;
        self.fail_batch = true;
        self
    }

    /// Fail only the batched call, forcing the per-utterance fallback
    pub fn with_batch_failure(mut self) -> Self {
        self.fail_batch = true;
        self
    }

    pub fn single_calls(&self) -> usize {
        self.single_calls.get()
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.get()
    }

    fn analysis(&self) -> EmotionAnalysis {
        EmotionAnalysis::from_scores(self.text_scores.clone(), self.audio_scores.clone())
    }
}

impl EmotionAnalyzer for MockEmotionAnalyzer {
    fn analyze(&self, _text: &str, _waveform: &[f32]) -> ProviderResult<EmotionAnalysis> {
        self.single_calls.hit();
        if self.fail_single {
            return Err(mock_failure("emotion"));
        }
        Ok(self.analysis())
    }

    fn analyze_many(&self, inputs: &[EmotionInput]) -> ProviderResult<Vec<EmotionAnalysis>> {
        self.batch_calls.hit();
        if self.fail_batch {
            return Err(mock_failure("batched emotion"));
        }
        Ok(inputs.iter().map(|_| self.analysis()).collect())
    }
}

/// Mock voice embedder returning a fixed vector.
#[derive(Debug, Clone, Default)]
pub struct MockEmbedder {
    embedding: Option<Vec<f32>>,
    should_fail: bool,
    calls: CallCounter,
}

impl MockEmbedder {
    /// An embedder that finds no usable voice.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl VoiceEmbedder for MockEmbedder {
    fn extract(&self, wav_path: &Path) -> ProviderResult<Option<Vec<f32>>> {
        self.calls.hit();
        if self.should_fail {
            return Err(mock_failure("embedding"));
        }
        if !wav_path.exists() {
            return Err(ProviderError::Decode(format!(
                "{} does not exist",
                wav_path.display()
            )));
        }
        Ok(self.embedding.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_transcriber_returns_response() {
        let transcriber = MockTranscriber::new().with_response("Hello, this is a test");
        let result = transcriber.transcribe(&[0u8; 100]);
        assert_eq!(result.unwrap().as_deref(), Some("Hello, this is a test"));
        assert_eq!(transcriber.calls(), 1);
    }

    #[test]
    fn test_mock_transcriber_silent() {
        let transcriber = MockTranscriber::new().silent();
        assert_eq!(transcriber.transcribe(&[]).unwrap(), None);
    }

    #[test]
    fn test_mock_transcriber_returns_error_when_configured() {
        let transcriber = MockTranscriber::new().with_failure();
        let err = transcriber.transcribe(&[]).unwrap_err();
        assert_eq!(err.kind(), "unavailable");
    }

    #[test]
    fn test_clones_share_call_counter() {
        let transcriber = MockTranscriber::new();
        let clone = transcriber.clone();
        clone.transcribe(&[]).unwrap();
        assert_eq!(transcriber.calls(), 1);
    }

    #[test]
    fn test_fn_transcriber_sees_chunk_bytes() {
        let transcriber = FnTranscriber(|pcm: &[u8]| -> ProviderResult<Option<String>> {
            Ok(Some(format!("{} bytes", pcm.len())))
        });
        assert_eq!(
            transcriber.transcribe(&[1, 2, 3]).unwrap().as_deref(),
            Some("3 bytes")
        );
    }

    #[test]
    fn test_mock_diarizer_segments() {
        let diarizer = MockDiarizer::new()
            .with_segment("1", "hello", 0, 1000)
            .with_segment("2", "hi", 1000, 2000);
        let segments = diarizer.transcribe_batch(Path::new("unused.wav")).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].speaker, "2");
        assert_eq!(diarizer.calls(), 1);
    }

    #[test]
    fn test_mock_emotion_counts_calls() {
        let analyzer = MockEmotionAnalyzer::new();
        analyzer.analyze("x", &[]).unwrap();
        let inputs = vec![EmotionInput {
            text: "x".into(),
            speaker: "1".into(),
            waveform: None,
        }];
        assert_eq!(analyzer.analyze_many(&inputs).unwrap().len(), 1);
        assert_eq!(analyzer.single_calls(), 1);
        assert_eq!(analyzer.batch_calls(), 1);
    }

    #[test]
    fn test_mock_embedder_requires_existing_file() {
        let embedder = MockEmbedder::new().with_embedding(vec![1.0, 0.0]);
        assert!(embedder.extract(Path::new("/nonexistent/x.wav")).is_err());

        let file = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(embedder.extract(file.path()).unwrap(), Some(vec![1.0, 0.0]));
    }
}
