//! Default configuration constants for convoscope.
//!
//! Shared by the config layer, the streaming stages and finalization so the
//! same numbers are used everywhere.

use std::time::Duration;

/// Default audio sample rate in Hz.
///
/// Clients stream 16 kHz mono PCM, the standard rate for speech recognition.
pub const SAMPLE_RATE: u32 = 16000;

/// Bytes per sample of the inbound PCM stream (16-bit little endian).
pub const BYTES_PER_SAMPLE: u16 = 2;

/// Duration of one streaming analysis chunk in seconds.
///
/// At 16 kHz/16-bit mono this is 64,000 bytes per chunk.
pub const CHUNK_DURATION_SECS: f64 = 2.0;

/// Wall-clock budget for analyzing one chunk before its slot is dropped.
pub const CHUNK_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum number of chunk analyses running at once across the process.
pub const MAX_CONCURRENT_ANALYSES: usize = 4;

/// Cosine similarity needed for a streaming chunk to count as the enrolled user.
pub const STREAMING_SIMILARITY_THRESHOLD: f32 = 0.5;

/// Cosine similarity needed for a finalized segment to count as the enrolled user.
///
/// Stricter than the streaming threshold: batch segments are longer and cleaner.
pub const FINALIZE_SIMILARITY_THRESHOLD: f32 = 0.75;

/// Value returned by cosine similarity when vectors are missing, empty,
/// mismatched or zero.
pub const SIMILARITY_SENTINEL: f32 = -1.0;

/// Numeric identity used for conversations whose owner cannot be resolved.
pub const UNKNOWN_USER_UID: i64 = 0;

/// WebSocket close code sent when the setup handshake is rejected (policy violation).
pub const SETUP_REJECTED_CLOSE_CODE: u16 = 1008;

/// WebSocket close code sent on a normal end of session.
pub const NORMAL_CLOSE_CODE: u16 = 1000;

/// Capacity of per-session frame channels between transport and controller.
pub const CHANNEL_CAPACITY: usize = 64;

/// Default bind address for the server.
pub const BIND_ADDR: &str = "0.0.0.0:8000";

/// Default SQLite database location.
pub const DATABASE_PATH: &str = "storage/convoscope.sqlite";

/// Default directory for persisted session and segment audio.
pub const AUDIO_DIR: &str = "storage/audio";

/// Default timeout for a single provider HTTP request.
pub const PROVIDER_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Default log filter when `RUST_LOG` is unset.
pub const LOG_FILTER: &str = "info";

/// Number of bytes in one chunk for the given stream format.
///
/// Rounded down to a whole number of samples so chunk boundaries never split
/// a sample.
pub fn chunk_size_bytes(duration_secs: f64, sample_rate: u32, bytes_per_sample: u16) -> usize {
    let samples = (duration_secs * sample_rate as f64).floor() as usize;
    samples * bytes_per_sample as usize
}
