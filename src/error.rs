//! Error types for convoscope.

use thiserror::Error;

/// Failure reported by a provider adapter (transcription, emotion, embedding).
///
/// The streaming core maps every kind to a "no payload" chunk outcome; the
/// finalization pipeline maps emotion failures to a neutral distribution.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider timed out")]
    Timeout,

    #[error("audio decode failed: {0}")]
    Decode(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Short stable label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Unavailable(_) => "unavailable",
            ProviderError::Timeout => "timeout",
            ProviderError::Decode(_) => "decode",
            ProviderError::InvalidResponse(_) => "invalid_response",
        }
    }
}

/// Reasons a connection is rejected before entering the streaming state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SetupError {
    #[error("setup message is not valid JSON: {0}")]
    Malformed(String),

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("setup message has no event field")]
    MissingEvent,

    #[error("setup message has no user_id")]
    MissingIdentity,

    #[error("event '{got}' is not accepted on this endpoint (expected '{expected}')")]
    WrongEvent {
        expected: &'static str,
        got: &'static str,
    },

    #[error("binary frame received before setup")]
    BinaryBeforeSetup,
}

#[derive(Error, Debug)]
pub enum ConvoError {
    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    // Audio errors
    #[error("WAV encoding failed: {message}")]
    WavEncode { message: String },

    #[error("WAV decoding failed: {message}")]
    WavDecode { message: String },

    #[error("Segment cut failed: {message}")]
    SegmentCut { message: String },

    // Provider errors
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // Session errors
    #[error("Setup rejected: {0}")]
    Setup(#[from] SetupError),

    #[error("Background task failed: {message}")]
    Task { message: String },

    // Persistence errors
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<tokio::task::JoinError> for ConvoError {
    fn from(e: tokio::task::JoinError) -> Self {
        ConvoError::Task {
            message: e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConvoError>;
