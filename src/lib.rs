//! convoscope - Real-time conversation analysis
//!
//! Streams live audio over WebSocket, returns ordered per-chunk transcript,
//! emotion and speaker-match results, and re-analyzes the whole conversation
//! with diarization when the client disconnects.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod cli;
pub mod config;
pub mod defaults;
pub mod emotion;
pub mod error;
pub mod finalize;
pub mod providers;
pub mod server;
pub mod session;
pub mod speaker;
pub mod store;
pub mod streaming;

// Provider seams
pub use providers::{
    BatchTranscriber, EmotionAnalyzer, Providers, StreamingTranscriber, VoiceEmbedder,
};
pub use store::{ConversationStore, SqliteStore};

// Core pipeline
pub use finalize::{FinalizationPipeline, FinalizeOutcome, FinalizeRequest};
pub use session::{SessionContext, SessionController, SessionKind, SessionReport};
pub use streaming::{AnalysisResult, AudioChunker, ChunkAnalyzer, ResultSequencer};

// Error handling
pub use error::{ConvoError, ProviderError, Result, SetupError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_carries_git_hash_when_built_from_git() {
        let ver = version_string();
        if option_env!("GIT_HASH").is_some_and(|h| !h.is_empty()) {
            let hash_part = ver.split('+').nth(1).unwrap_or("");
            assert_eq!(hash_part.len(), 7, "Git hash should be 7 chars, got: {}", ver);
        } else {
            assert_eq!(ver, env!("CARGO_PKG_VERSION"));
        }
    }
}
