//! Audio encoding, decoding and segmentation.

pub mod cutter;
pub mod wav;

pub use cutter::{Span, cut_wav_by_timestamps};
pub use wav::{PcmFormat, encode_wav, pcm_to_waveform, read_waveform, write_wav};
