//! Frame-accurate WAV segmentation.

use crate::error::{ConvoError, Result};
use std::path::{Path, PathBuf};

/// A half-open `[start_ms, end_ms)` span to cut out of a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl Span {
    pub fn new(start_ms: u64, end_ms: u64) -> Self {
        Self { start_ms, end_ms }
    }
}

fn ms_to_frame(ms: u64, sample_rate: u32) -> usize {
    (ms * sample_rate as u64 / 1000) as usize
}

fn cut_error(message: impl Into<String>) -> ConvoError {
    ConvoError::SegmentCut {
        message: message.into(),
    }
}

/// Cut `input` into one WAV per span, written as `segment_<n>.wav` (1-based)
/// under `out_dir`.
///
/// Samples are copied with the source spec, never re-encoded. Spans are
/// clamped to the recording; a span that ends up empty still produces a
/// (zero-length) file so output indices line up with the input spans.
pub fn cut_wav_by_timestamps(input: &Path, spans: &[Span], out_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut reader = hound::WavReader::open(input)
        .map_err(|e| cut_error(format!("cannot open {}: {}", input.display(), e)))?;
    let spec = reader.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err(cut_error(format!(
            "unsupported sample format: {} bits {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }

    let channels = spec.channels.max(1) as usize;
    let samples: Vec<i16> = reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| cut_error(format!("cannot read samples: {}", e)))?;
    let total_frames = samples.len() / channels;

    std::fs::create_dir_all(out_dir)?;

    let mut outputs = Vec::with_capacity(spans.len());
    for (index, span) in spans.iter().enumerate() {
        let start = ms_to_frame(span.start_ms, spec.sample_rate).min(total_frames);
        let end = ms_to_frame(span.end_ms, spec.sample_rate).clamp(start, total_frames);

        let path = out_dir.join(format!("segment_{}.wav", index + 1));
        let mut writer = hound::WavWriter::create(&path, spec)
            .map_err(|e| cut_error(format!("cannot create {}: {}", path.display(), e)))?;
        for &sample in &samples[start * channels..end * channels] {
            writer
                .write_sample(sample)
                .map_err(|e| cut_error(e.to_string()))?;
        }
        writer.finalize().map_err(|e| cut_error(e.to_string()))?;
        outputs.push(path);
    }

    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::{PcmFormat, write_wav};

    fn write_ramp(path: &Path, frames: usize) {
        let bytes: Vec<u8> = (0..frames)
            .flat_map(|i| (i as i16).to_le_bytes())
            .collect();
        write_wav(path, &bytes, PcmFormat::default()).unwrap();
    }

    fn frame_count(path: &Path) -> usize {
        hound::WavReader::open(path).unwrap().duration() as usize
    }

    #[test]
    fn segments_covering_recording_sum_to_total() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("full.wav");
        // 6 seconds at 16kHz
        write_ramp(&input, 96_000);

        let spans = [
            Span::new(0, 1_333),
            Span::new(1_333, 3_501),
            Span::new(3_501, 4_999),
            Span::new(4_999, 6_000),
        ];
        let outputs = cut_wav_by_timestamps(&input, &spans, &dir.path().join("segments")).unwrap();
        assert_eq!(outputs.len(), 4);

        let total: usize = outputs.iter().map(|p| frame_count(p)).sum();
        let cuts = spans.len() - 1;
        assert!(
            total.abs_diff(96_000) <= cuts,
            "segment frames {} should equal input frames within one per cut",
            total
        );
    }

    #[test]
    fn segment_files_are_numbered_from_one() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("full.wav");
        write_ramp(&input, 16_000);

        let out_dir = dir.path().join("out");
        let outputs =
            cut_wav_by_timestamps(&input, &[Span::new(0, 500), Span::new(500, 1000)], &out_dir)
                .unwrap();
        assert_eq!(outputs[0], out_dir.join("segment_1.wav"));
        assert_eq!(outputs[1], out_dir.join("segment_2.wav"));
    }

    #[test]
    fn cut_starts_at_exact_frame() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("full.wav");
        write_ramp(&input, 16_000);

        let outputs =
            cut_wav_by_timestamps(&input, &[Span::new(250, 500)], dir.path()).unwrap();
        let mut reader = hound::WavReader::open(&outputs[0]).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 4_000);
        assert_eq!(samples[0], 4_000, "segment should begin at frame 250ms * 16");
    }

    #[test]
    fn spans_past_the_end_are_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("full.wav");
        write_ramp(&input, 16_000);

        let outputs =
            cut_wav_by_timestamps(&input, &[Span::new(900, 5_000), Span::new(2_000, 3_000)], dir.path())
                .unwrap();
        assert_eq!(frame_count(&outputs[0]), 1_600);
        assert_eq!(frame_count(&outputs[1]), 0);
    }

    #[test]
    fn missing_input_is_cut_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = cut_wav_by_timestamps(
            &dir.path().join("absent.wav"),
            &[Span::new(0, 10)],
            dir.path(),
        );
        assert!(matches!(result, Err(ConvoError::SegmentCut { .. })));
    }
}
