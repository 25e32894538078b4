//! HTTP adapter that routes every provider concern to one analysis backend.
//!
//! The provider traits are synchronous and are only ever called from tokio's
//! blocking pool, so each call drives the async `reqwest` client to
//! completion on the captured runtime handle.

use super::{
    BatchTranscriber, DiarizedSegment, EmotionAnalyzer, EmotionInput, ProviderResult,
    StreamingTranscriber, VoiceEmbedder,
};
use crate::audio::wav::{PcmFormat, encode_wav, waveform_to_pcm};
use crate::emotion::{EmotionAnalysis, EmotionScores};
use crate::error::ProviderError;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;
use tokio::runtime::Handle;

pub struct HttpProviders {
    http: reqwest::Client,
    endpoint: String,
    format: PcmFormat,
    runtime: Handle,
}

#[derive(Deserialize)]
struct TranscribeResponse {
    text: Option<String>,
}

#[derive(Deserialize)]
struct DiarizeResponse {
    #[serde(default)]
    segments: Vec<WireSegment>,
}

#[derive(Deserialize)]
struct WireSegment {
    #[serde(default)]
    speaker: String,
    #[serde(default)]
    text: String,
    start: u64,
    end: u64,
}

#[derive(Deserialize)]
struct WireScores {
    #[serde(default)]
    scores: EmotionScores,
}

#[derive(Deserialize)]
struct EmotionResponse {
    text: WireScores,
    audio: WireScores,
}

impl From<EmotionResponse> for EmotionAnalysis {
    fn from(response: EmotionResponse) -> Self {
        EmotionAnalysis::from_scores(response.text.scores, response.audio.scores)
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Option<Vec<f32>>,
}

#[derive(serde::Serialize)]
struct ManifestEntry<'a> {
    text: &'a str,
    speaker: &'a str,
    audio: Option<String>,
}

fn map_transport(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else if e.is_decode() {
        ProviderError::InvalidResponse(e.to_string())
    } else {
        ProviderError::Unavailable(e.to_string())
    }
}

fn wav_part(wav: Vec<u8>, name: &str) -> ProviderResult<Part> {
    Part::bytes(wav)
        .file_name(format!("{}.wav", name))
        .mime_str("audio/wav")
        .map_err(|e| ProviderError::Unavailable(e.to_string()))
}

impl HttpProviders {
    /// Must be called from within a tokio runtime.
    pub fn new(endpoint: &str, timeout: Duration, format: PcmFormat) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let runtime = Handle::try_current()?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            format,
            runtime,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    fn pcm_to_wav(&self, pcm: &[u8]) -> ProviderResult<Vec<u8>> {
        encode_wav(pcm, self.format).map_err(|e| ProviderError::Decode(e.to_string()))
    }

    fn waveform_to_wav(&self, waveform: &[f32]) -> ProviderResult<Vec<u8>> {
        self.pcm_to_wav(&waveform_to_pcm(waveform))
    }

    fn read_wav(path: &Path) -> ProviderResult<Vec<u8>> {
        std::fs::read(path)
            .map_err(|e| ProviderError::Decode(format!("{}: {}", path.display(), e)))
    }

    fn post_wav<T: DeserializeOwned>(&self, path: &str, wav: Vec<u8>) -> ProviderResult<T> {
        let request = self
            .http
            .post(self.url(path))
            .header("Content-Type", "audio/wav")
            .body(wav);
        self.runtime.block_on(Self::send(request))
    }

    fn post_form<T: DeserializeOwned>(&self, path: &str, form: Form) -> ProviderResult<T> {
        let request = self.http.post(self.url(path)).multipart(form);
        self.runtime.block_on(Self::send(request))
    }

    async fn send<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> ProviderResult<T> {
        let resp = request.send().await.map_err(map_transport)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Unavailable(format!(
                "backend returned {status}: {body}"
            )));
        }

        let body = resp.bytes().await.map_err(map_transport)?;
        serde_json::from_slice(&body).map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}

impl StreamingTranscriber for HttpProviders {
    fn transcribe(&self, pcm: &[u8]) -> ProviderResult<Option<String>> {
        let response: TranscribeResponse = self.post_wav("/v1/transcribe", self.pcm_to_wav(pcm)?)?;
        Ok(response.text.filter(|t| !t.trim().is_empty()))
    }
}

impl BatchTranscriber for HttpProviders {
    fn transcribe_batch(&self, wav_path: &Path) -> ProviderResult<Vec<DiarizedSegment>> {
        let response: DiarizeResponse = self.post_wav("/v1/diarize", Self::read_wav(wav_path)?)?;
        Ok(response
            .segments
            .into_iter()
            .map(|s| DiarizedSegment {
                speaker: s.speaker,
                text: s.text,
                start_ms: s.start,
                end_ms: s.end,
            })
            .collect())
    }
}

impl EmotionAnalyzer for HttpProviders {
    fn analyze(&self, text: &str, waveform: &[f32]) -> ProviderResult<EmotionAnalysis> {
        let form = Form::new()
            .text("text", text.to_string())
            .part("audio", wav_part(self.waveform_to_wav(waveform)?, "audio")?);
        let response: EmotionResponse = self.post_form("/v1/emotion", form)?;
        Ok(response.into())
    }

    fn analyze_many(&self, inputs: &[EmotionInput]) -> ProviderResult<Vec<EmotionAnalysis>> {
        let mut manifest = Vec::with_capacity(inputs.len());
        let mut form = Form::new();
        for (index, input) in inputs.iter().enumerate() {
            let audio = match &input.waveform {
                Some(waveform) => {
                    let name = format!("audio_{}", index);
                    form = form.part(name.clone(), wav_part(self.waveform_to_wav(waveform)?, &name)?);
                    Some(name)
                }
                None => None,
            };
            manifest.push(ManifestEntry {
                text: &input.text,
                speaker: &input.speaker,
                audio,
            });
        }
        let manifest = serde_json::to_string(&manifest)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        form = form.text("manifest", manifest);

        let response: Vec<EmotionResponse> = self.post_form("/v1/emotion/batch", form)?;
        if response.len() != inputs.len() {
            return Err(ProviderError::InvalidResponse(format!(
                "expected {} analyses, got {}",
                inputs.len(),
                response.len()
            )));
        }
        Ok(response.into_iter().map(Into::into).collect())
    }
}

impl VoiceEmbedder for HttpProviders {
    fn extract(&self, wav_path: &Path) -> ProviderResult<Option<Vec<f32>>> {
        let response: EmbeddingResponse =
            self.post_wav("/v1/embedding", Self::read_wav(wav_path)?)?;
        Ok(response.embedding.filter(|e| !e.is_empty()))
    }
}
