//! Per-chunk analysis: transcribe, score emotion, verify speaker.
//!
//! Every provider call is blocking and runs on tokio's blocking pool under a
//! process-wide semaphore. The whole analysis, including the wait for a
//! permit, is bounded by the chunk timeout. A timed-out chunk gives its
//! permit back immediately; tokio's blocking thread cap bounds stuck calls.

use crate::audio::wav::{PcmFormat, encode_wav, pcm_to_waveform};
use crate::config::Config;
use crate::emotion::EmotionAnalysis;
use crate::providers::Providers;
use crate::speaker::SpeakerVerdict;
use crate::speaker::cache::Embedding;
use crate::streaming::frame::{AnalysisResult, Chunk, ChunkOutcome};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, oneshot};
use tracing::{debug, error, warn};

/// Runs the three-stage pipeline for single chunks.
#[derive(Clone)]
pub struct ChunkAnalyzer {
    providers: Providers,
    permits: Arc<Semaphore>,
    timeout: Duration,
    threshold: f32,
    format: PcmFormat,
}

impl ChunkAnalyzer {
    pub fn new(providers: Providers, permits: Arc<Semaphore>, config: &Config) -> Self {
        Self {
            providers,
            permits,
            timeout: config.analysis.chunk_timeout,
            threshold: config.analysis.similarity_threshold,
            format: PcmFormat::from(&config.audio),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Analyze one chunk. Never fails; every problem becomes an outcome.
    ///
    /// The pool permit belongs to this future, so a timeout releases it at
    /// once. The abandoned provider call keeps running on the blocking pool
    /// and its late result is dropped.
    pub async fn analyze(&self, chunk: Chunk, reference: Option<Embedding>) -> ChunkOutcome {
        let sequence = chunk.sequence;
        match tokio::time::timeout(self.timeout, self.dispatch(chunk, reference)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(seq = sequence, timeout = ?self.timeout, "chunk analysis timed out");
                ChunkOutcome::TimedOut
            }
        }
    }

    async fn dispatch(&self, chunk: Chunk, reference: Option<Embedding>) -> ChunkOutcome {
        let Ok(_permit) = self.permits.clone().acquire_owned().await else {
            return ChunkOutcome::Failed("unavailable");
        };

        let sequence = chunk.sequence;
        let job = BlockingJob {
            providers: self.providers.clone(),
            threshold: self.threshold,
            format: self.format,
        };
        let (done_tx, done_rx) = oneshot::channel();
        tokio::task::spawn_blocking(move || {
            let outcome = job.run(&chunk, reference.as_deref());
            if done_tx.send(outcome).is_err() {
                debug!(seq = sequence, "late chunk result discarded");
            }
        });

        match done_rx.await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(seq = sequence, "chunk analysis task panicked");
                ChunkOutcome::Failed("panic")
            }
        }
    }
}

/// State moved onto the blocking pool for one chunk.
struct BlockingJob {
    providers: Providers,
    threshold: f32,
    format: PcmFormat,
}

impl BlockingJob {
    fn run(&self, chunk: &Chunk, reference: Option<&Vec<f32>>) -> ChunkOutcome {
        let seq = chunk.sequence;

        let transcript = match self.providers.transcriber.transcribe(&chunk.bytes) {
            Ok(Some(text)) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                debug!(seq, "no speech in chunk");
                return ChunkOutcome::NoSpeech;
            }
            Err(e) => {
                warn!(seq, kind = e.kind(), error = %e, "streaming transcription failed");
                return ChunkOutcome::Failed(e.kind());
            }
        };

        let waveform = pcm_to_waveform(&chunk.bytes);
        let emotion = self
            .providers
            .emotion
            .analyze(&transcript, &waveform)
            .unwrap_or_else(|e| {
                warn!(seq, error = %e, "emotion analysis failed, using neutral scores");
                EmotionAnalysis::neutral()
            });

        let verdict = match reference {
            Some(reference) => match self.verify_speaker(chunk, reference) {
                Ok(verdict) => verdict,
                Err(kind) => return ChunkOutcome::Failed(kind),
            },
            None => None,
        };

        ChunkOutcome::Payload(Box::new(AnalysisResult {
            sequence: seq,
            transcript,
            emotion,
            is_same: verdict.map(|v| v.is_same),
            similarity: verdict.map(|v| v.similarity),
        }))
    }

    /// Compare the chunk's voice with the enrolled reference.
    ///
    /// The transient WAV is deleted when `artifact` drops, on every path.
    fn verify_speaker(
        &self,
        chunk: &Chunk,
        reference: &[f32],
    ) -> Result<Option<SpeakerVerdict>, &'static str> {
        let seq = chunk.sequence;
        let wav = encode_wav(&chunk.bytes, self.format).map_err(|e| {
            warn!(seq, error = %e, "cannot encode chunk for speaker check");
            "decode"
        })?;

        let mut artifact = tempfile::Builder::new()
            .prefix("convoscope-chunk-")
            .suffix(".wav")
            .tempfile()
            .map_err(|e| {
                warn!(seq, error = %e, "cannot create chunk artifact");
                "io"
            })?;
        artifact.write_all(&wav).map_err(|e| {
            warn!(seq, error = %e, "cannot write chunk artifact");
            "io"
        })?;

        match self.providers.embedder.extract(artifact.path()) {
            Ok(Some(embedding)) => {
                let verdict = SpeakerVerdict::compare(reference, &embedding, self.threshold);
                debug!(seq, similarity = verdict.similarity, is_same = verdict.is_same, "speaker verified");
                Ok(Some(verdict))
            }
            Ok(None) => {
                debug!(seq, "no usable voice in chunk");
                Ok(None)
            }
            Err(e) => {
                warn!(seq, kind = e.kind(), error = %e, "embedding extraction failed");
                Err(e.kind())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::scores;
    use crate::providers::ProviderResult;
    use crate::providers::mock::{
        FnTranscriber, MockDiarizer, MockEmbedder, MockEmotionAnalyzer, MockTranscriber,
    };

    fn providers(
        transcriber: MockTranscriber,
        emotion: MockEmotionAnalyzer,
        embedder: MockEmbedder,
    ) -> Providers {
        Providers {
            transcriber: Arc::new(transcriber),
            diarizer: Arc::new(MockDiarizer::new()),
            emotion: Arc::new(emotion),
            embedder: Arc::new(embedder),
        }
    }

    fn analyzer(providers: Providers) -> ChunkAnalyzer {
        ChunkAnalyzer::new(providers, Arc::new(Semaphore::new(2)), &Config::default())
    }

    fn chunk(sequence: u64) -> Chunk {
        Chunk::new(sequence, vec![0u8; 3200])
    }

    #[tokio::test]
    async fn speech_produces_payload_without_reference() {
        let analyzer = analyzer(providers(
            MockTranscriber::new().with_response("  hello there "),
            MockEmotionAnalyzer::new(),
            MockEmbedder::new().with_embedding(vec![1.0, 0.0]),
        ));

        let outcome = analyzer.analyze(chunk(4), None).await;
        let result = outcome.into_payload().expect("payload");
        assert_eq!(result.sequence, 4);
        assert_eq!(result.transcript, "hello there");
        assert_eq!(result.emotion.dominant(), "happy");
        assert_eq!(result.is_same, None, "no reference means no verdict, never false");
        assert_eq!(result.similarity, None);
    }

    #[tokio::test]
    async fn silence_is_no_speech() {
        let emotion = MockEmotionAnalyzer::new();
        let analyzer = analyzer(providers(
            MockTranscriber::new().silent(),
            emotion.clone(),
            MockEmbedder::new(),
        ));
        assert_eq!(analyzer.analyze(chunk(0), None).await, ChunkOutcome::NoSpeech);
        assert_eq!(emotion.single_calls(), 0, "emotion is skipped without a transcript");

        let analyzer = analyzer_with_text("   ");
        assert_eq!(analyzer.analyze(chunk(0), None).await, ChunkOutcome::NoSpeech);
    }

    fn analyzer_with_text(text: &str) -> ChunkAnalyzer {
        analyzer(providers(
            MockTranscriber::new().with_response(text),
            MockEmotionAnalyzer::new(),
            MockEmbedder::new(),
        ))
    }

    #[tokio::test]
    async fn transcription_failure_is_failed_with_kind() {
        let analyzer = analyzer(providers(
            MockTranscriber::new().with_failure(),
            MockEmotionAnalyzer::new(),
            MockEmbedder::new(),
        ));
        assert_eq!(
            analyzer.analyze(chunk(1), None).await,
            ChunkOutcome::Failed("unavailable")
        );
    }

    #[tokio::test]
    async fn emotion_failure_degrades_to_neutral() {
        let analyzer = analyzer(providers(
            MockTranscriber::new().with_response("words"),
            MockEmotionAnalyzer::new().with_failure(),
            MockEmbedder::new(),
        ));
        let result = analyzer.analyze(chunk(0), None).await.into_payload().unwrap();
        assert_eq!(result.emotion, EmotionAnalysis::neutral());
    }

    #[tokio::test]
    async fn identical_embedding_matches_reference() {
        let reference = vec![0.2, 0.4, 0.9];
        let analyzer = analyzer(providers(
            MockTranscriber::new().with_response("it's me"),
            MockEmotionAnalyzer::new(),
            MockEmbedder::new().with_embedding(reference.clone()),
        ));

        let result = analyzer
            .analyze(chunk(0), Some(Arc::new(reference)))
            .await
            .into_payload()
            .unwrap();
        assert_eq!(result.is_same, Some(true));
        assert!(result.similarity.unwrap() > 0.999);
    }

    #[tokio::test]
    async fn different_voice_is_not_same() {
        let analyzer = analyzer(providers(
            MockTranscriber::new().with_response("someone else"),
            MockEmotionAnalyzer::new().with_audio_scores(scores(&[("sad", 1.0)])),
            MockEmbedder::new().with_embedding(vec![0.0, 1.0]),
        ));
        let result = analyzer
            .analyze(chunk(0), Some(Arc::new(vec![1.0, 0.0])))
            .await
            .into_payload()
            .unwrap();
        assert_eq!(result.is_same, Some(false));
        assert_eq!(result.similarity, Some(0.0));
    }

    #[tokio::test]
    async fn unusable_voice_gives_null_verdict() {
        let analyzer = analyzer(providers(
            MockTranscriber::new().with_response("short"),
            MockEmotionAnalyzer::new(),
            MockEmbedder::new(),
        ));
        let result = analyzer
            .analyze(chunk(0), Some(Arc::new(vec![1.0])))
            .await
            .into_payload()
            .unwrap();
        assert_eq!(result.is_same, None);
        assert_eq!(result.similarity, None);
    }

    #[tokio::test]
    async fn embedding_failure_fails_chunk() {
        let analyzer = analyzer(providers(
            MockTranscriber::new().with_response("words"),
            MockEmotionAnalyzer::new(),
            MockEmbedder::new().with_failure(),
        ));
        assert_eq!(
            analyzer.analyze(chunk(0), Some(Arc::new(vec![1.0]))).await,
            ChunkOutcome::Failed("unavailable")
        );
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let analyzer = analyzer(providers(
            MockTranscriber::new().with_delay(Duration::from_millis(500)),
            MockEmotionAnalyzer::new(),
            MockEmbedder::new(),
        ))
        .with_timeout(Duration::from_millis(50));

        let started = std::time::Instant::now();
        assert_eq!(analyzer.analyze(chunk(0), None).await, ChunkOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn waiting_for_a_permit_counts_against_timeout() {
        let permits = Arc::new(Semaphore::new(1));
        let _held = permits.clone().acquire_owned().await.unwrap();
        let analyzer = ChunkAnalyzer::new(
            providers(
                MockTranscriber::new(),
                MockEmotionAnalyzer::new(),
                MockEmbedder::new(),
            ),
            permits,
            &Config::default(),
        )
        .with_timeout(Duration::from_millis(50));

        assert_eq!(analyzer.analyze(chunk(0), None).await, ChunkOutcome::TimedOut);
    }

    #[tokio::test]
    async fn timed_out_chunk_releases_its_permit() {
        let transcriber = FnTranscriber(|pcm: &[u8]| -> ProviderResult<Option<String>> {
            if pcm.first() == Some(&1) {
                std::thread::sleep(Duration::from_millis(1000));
            }
            Ok(Some("fine".to_string()))
        });
        let analyzer = ChunkAnalyzer::new(
            Providers {
                transcriber: Arc::new(transcriber),
                diarizer: Arc::new(MockDiarizer::new()),
                emotion: Arc::new(MockEmotionAnalyzer::new()),
                embedder: Arc::new(MockEmbedder::new()),
            },
            Arc::new(Semaphore::new(1)),
            &Config::default(),
        )
        .with_timeout(Duration::from_millis(200));

        let hung = Chunk::new(0, vec![1u8; 3200]);
        assert_eq!(analyzer.analyze(hung, None).await, ChunkOutcome::TimedOut);

        // The hung call is still sleeping on the blocking pool.
        for seq in 1..=3 {
            let result = analyzer.analyze(chunk(seq), None).await.into_payload();
            assert_eq!(result.map(|r| r.sequence), Some(seq));
        }
    }

    #[tokio::test]
    async fn stricter_threshold_rejects_a_close_voice() {
        let analyzer = analyzer(providers(
            MockTranscriber::new().with_response("close enough"),
            MockEmotionAnalyzer::new(),
            MockEmbedder::new().with_embedding(vec![1.0, 1.0]),
        ));
        let reference = Arc::new(vec![1.0, 0.0]);

        let lenient = analyzer.clone().with_threshold(0.5);
        let result = lenient.analyze(chunk(0), Some(reference.clone())).await.into_payload().unwrap();
        assert_eq!(result.is_same, Some(true));

        let strict = analyzer.with_threshold(0.9);
        let result = strict.analyze(chunk(0), Some(reference)).await.into_payload().unwrap();
        assert_eq!(result.is_same, Some(false));
    }
}
