//! PCM/WAV conversion for streamed session audio.
//!
//! Clients send raw little-endian 16-bit mono PCM. Providers and the segment
//! cutter work on WAV artifacts, and emotion analysis wants a normalized
//! `f32` waveform at the session's configured sample rate.

use crate::config::AudioConfig;
use crate::defaults::SAMPLE_RATE;
use crate::error::{ConvoError, Result};
use std::io::{Cursor, Read};
use std::path::Path;

/// Layout of the raw PCM bytes received from a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub bytes_per_sample: u16,
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            bytes_per_sample: crate::defaults::BYTES_PER_SAMPLE,
        }
    }
}

impl From<&AudioConfig> for PcmFormat {
    fn from(config: &AudioConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            bytes_per_sample: config.bytes_per_sample,
        }
    }
}

impl PcmFormat {
    /// Duration in milliseconds of `byte_len` bytes of mono PCM.
    pub fn duration_ms(&self, byte_len: usize) -> u64 {
        let frame = self.bytes_per_sample as u64;
        if frame == 0 || self.sample_rate == 0 {
            return 0;
        }
        (byte_len as u64 / frame) * 1000 / self.sample_rate as u64
    }

    fn wav_spec(&self) -> Result<hound::WavSpec> {
        if self.bytes_per_sample != 2 {
            return Err(ConvoError::WavEncode {
                message: format!(
                    "only 16-bit PCM is supported, got {} bytes per sample",
                    self.bytes_per_sample
                ),
            });
        }
        Ok(hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        })
    }
}

/// Decode little-endian 16-bit PCM bytes into samples.
///
/// A trailing odd byte is ignored.
pub fn pcm_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Normalize samples to `[-1.0, 1.0)`.
pub fn samples_to_waveform(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Raw PCM bytes straight to a normalized waveform.
pub fn pcm_to_waveform(bytes: &[u8]) -> Vec<f32> {
    samples_to_waveform(&pcm_to_samples(bytes))
}

/// Quantize a normalized waveform back to little-endian 16-bit PCM.
pub fn waveform_to_pcm(waveform: &[f32]) -> Vec<u8> {
    waveform
        .iter()
        .flat_map(|&s| ((s.clamp(-1.0, 1.0) * 32767.0) as i16).to_le_bytes())
        .collect()
}

/// Wrap raw PCM in an in-memory WAV container.
pub fn encode_wav(bytes: &[u8], format: PcmFormat) -> Result<Vec<u8>> {
    let spec = format.wav_spec()?;
    let mut cursor = Cursor::new(Vec::with_capacity(bytes.len() + 44));
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| ConvoError::WavEncode {
                message: e.to_string(),
            })?;
        for sample in pcm_to_samples(bytes) {
            writer
                .write_sample(sample)
                .map_err(|e| ConvoError::WavEncode {
                    message: e.to_string(),
                })?;
        }
        writer.finalize().map_err(|e| ConvoError::WavEncode {
            message: e.to_string(),
        })?;
    }
    Ok(cursor.into_inner())
}

/// Write raw PCM to a WAV file, creating parent directories as needed.
pub fn write_wav(path: &Path, bytes: &[u8], format: PcmFormat) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let encoded = encode_wav(bytes, format)?;
    std::fs::write(path, encoded)?;
    Ok(())
}

/// Read any 16-bit WAV as mono samples at `target_rate`.
///
/// Stereo input is downmixed; other rates are linearly resampled.
pub fn read_samples<R: Read>(reader: R, target_rate: u32) -> Result<Vec<i16>> {
    let mut wav_reader = hound::WavReader::new(reader).map_err(|e| ConvoError::WavDecode {
        message: format!("Failed to parse WAV data: {}", e),
    })?;

    let spec = wav_reader.spec();
    if spec.channels == 0 {
        return Err(ConvoError::WavDecode {
            message: "WAV header declares zero channels".to_string(),
        });
    }

    let raw_samples: Vec<i16> = wav_reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ConvoError::WavDecode {
            message: format!("Failed to read WAV samples: {}", e),
        })?;

    let mono_samples = if spec.channels > 1 {
        let channels = spec.channels as usize;
        raw_samples
            .chunks_exact(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / channels as i32) as i16
            })
            .collect()
    } else {
        raw_samples
    };

    Ok(resample(&mono_samples, spec.sample_rate, target_rate))
}

/// Read a WAV file as a normalized mono waveform at `format.sample_rate`,
/// the same rate [`pcm_to_waveform`] yields for streamed chunks.
pub fn read_waveform(path: &Path, format: PcmFormat) -> Result<Vec<f32>> {
    let file = std::fs::File::open(path)?;
    let samples = read_samples(std::io::BufReader::new(file), format.sample_rate)?;
    Ok(samples_to_waveform(&samples))
}

/// Simple linear interpolation resampling.
fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}
